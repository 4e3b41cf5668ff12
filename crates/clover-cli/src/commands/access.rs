//! `clover access` - statistics over a stored access log and per-user schema
//! access checks.

use super::context::Context;
use anyhow::{Result, bail};
use clover_audit::{AccessLogger, FileStorage};
use clover_core::{StorageBackend, UserId};
use clover_store::{PgCatalog, validate_schema_access};
use std::sync::Arc;

/// Open the configured access log file for reading.
fn stored_log(ctx: &Context) -> Result<AccessLogger> {
    let config = &ctx.config.access_log;
    let path = match (config.storage, &config.file_path) {
        (StorageBackend::File, Some(path)) => path,
        _ => bail!("access statistics need access_log.storage: file with a file_path"),
    };
    let storage = FileStorage::open(path)?;
    Ok(AccessLogger::with_storage(
        Arc::new(storage),
        config.buffer_size,
    )?)
}

pub async fn run_stats(ctx: &Context, user: &str, days: Option<i64>) -> Result<()> {
    let since = days.map(|d| chrono::Utc::now() - chrono::Duration::days(d));
    let stats = stored_log(ctx)?.user_stats(user, since).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub async fn run_report(ctx: &Context, date: Option<chrono::NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let report = stored_log(ctx)?.daily_report(date).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// What the user's mapped roles can read, compared with the catalog.
pub async fn run_check(ctx: &Context, user: &str) -> Result<()> {
    let mappings = ctx.mapping_store(ctx.app_pool().await?);
    let catalog = PgCatalog::new(ctx.data_pool().await?);
    let report = validate_schema_access(
        mappings.as_ref(),
        &catalog,
        &UserId::new(user),
        ctx.config.mapping.user_id_type,
        &ctx.database_name(),
        &ctx.config.schema.catalog_schemas,
        &ctx.config.mapping.default_schema,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
