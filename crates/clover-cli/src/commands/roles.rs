//! `clover grant`, `clover revoke` and `clover migrate`.

use super::context::Context;
use anyhow::{Result, bail};
use clover_core::UserId;
use clover_store::{RoleProvisioner, migrate};

async fn provisioner(ctx: &Context) -> Result<RoleProvisioner> {
    let app_pool = ctx.app_pool().await?;
    let data_pool = ctx.data_pool().await?;
    Ok(RoleProvisioner::new(
        data_pool,
        ctx.mapping_store(app_pool),
        ctx.database_name(),
        ctx.config.mapping.clone(),
    ))
}

pub async fn run_grant(ctx: &Context, user: &str, schema: &str, tables: &[String]) -> Result<()> {
    let mapping = provisioner(ctx)
        .await?
        .grant(&UserId::new(user), schema, tables)
        .await?;
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

pub async fn run_revoke(ctx: &Context, user: &str, schema: &str) -> Result<()> {
    if provisioner(ctx)
        .await?
        .revoke(&UserId::new(user), schema)
        .await?
    {
        println!("Revoked access of {} to schema {}", user, schema);
        Ok(())
    } else {
        bail!("{} has no mapping for schema {}", user, schema)
    }
}

pub async fn run_migrate(ctx: &Context) -> Result<()> {
    let pool = ctx.app_pool().await?;
    migrate(&pool, ctx.config.mapping.user_id_type).await?;
    println!("Application database is up to date");
    Ok(())
}
