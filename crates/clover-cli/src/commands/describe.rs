//! `clover describe` - description store maintenance.

use super::context::Context;
use anyhow::{Context as _, Result, bail};
use clover_core::{ColumnDescription, ObjectType, TableDescription};
use clover_store::{DescriptionStore, PgDescriptionStore};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Contents of a description file passed to `describe save`.
#[derive(Debug, Deserialize)]
struct DescriptionFile {
    #[serde(default)]
    object_type: ObjectType,
    #[serde(default)]
    description: String,
    #[serde(default)]
    columns: BTreeMap<String, ColumnDescription>,
    #[serde(default)]
    note: Option<String>,
}

fn parse_description_file(
    content: &str,
    database_name: &str,
    table: &str,
    source: &str,
) -> Result<TableDescription> {
    let file: DescriptionFile =
        serde_json::from_str(content).context("Invalid description file")?;
    Ok(TableDescription {
        database_name: database_name.to_string(),
        table_name: table.to_string(),
        object_type: file.object_type,
        description: file.description,
        columns: file.columns,
        imported_from: Some(source.to_string()),
        import_date: Some(chrono::Utc::now().to_rfc3339()),
        note: file.note,
    })
}

async fn store(ctx: &Context) -> Result<PgDescriptionStore> {
    Ok(PgDescriptionStore::new(ctx.app_pool().await?))
}

pub async fn run_save(ctx: &Context, table: &str, path: &Path) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let description = parse_description_file(
        &content,
        &ctx.database_name(),
        table,
        &path.display().to_string(),
    )?;

    store(ctx).await?.save_description(&description).await?;
    println!(
        "Saved description for {}.{} ({} columns)",
        description.database_name,
        description.table_name,
        description.columns.len()
    );
    Ok(())
}

pub async fn run_get(ctx: &Context, table: &str) -> Result<()> {
    let database_name = ctx.database_name();
    match store(ctx).await?.get_description(&database_name, table).await? {
        Some(description) => {
            println!("{}", serde_json::to_string_pretty(&description)?);
            Ok(())
        }
        None => bail!("No description for {}.{}", database_name, table),
    }
}

pub async fn run_list(ctx: &Context) -> Result<()> {
    let descriptions = store(ctx)
        .await?
        .list_descriptions(&ctx.database_name())
        .await?;
    println!("{}", serde_json::to_string_pretty(&descriptions)?);
    Ok(())
}

pub async fn run_delete(ctx: &Context, table: &str) -> Result<()> {
    let database_name = ctx.database_name();
    if store(ctx)
        .await?
        .delete_description(&database_name, table)
        .await?
    {
        println!("Deleted description for {}.{}", database_name, table);
        Ok(())
    } else {
        bail!("No description for {}.{}", database_name, table)
    }
}
