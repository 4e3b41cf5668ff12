//! `clover schema`.

use super::context::Context;
use anyhow::Result;
use clover_core::UserId;

pub async fn run_schema(ctx: &Context, user: Option<&str>) -> Result<()> {
    let access_log = ctx.access_logger()?;
    let service = ctx.schema_service(access_log.clone()).await?;

    let schema = match user {
        Some(user) => service.get_database_schema_for(&UserId::new(user)).await?,
        None => service.get_database_schema().await?,
    };
    access_log.flush().await;

    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
