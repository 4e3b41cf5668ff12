//! `clover query`, `clover validate` and `clover resolve`.

use super::context::Context;
use anyhow::{Result, bail};
use clover_core::UserId;
use clover_sql::SqlValidator;
use serde_json::json;

pub async fn run_query(ctx: &Context, user: &str, sql: &str) -> Result<()> {
    let access_log = ctx.access_logger()?;
    let executor = ctx.executor(access_log.clone()).await?;

    let result = executor
        .execute_query_with_user(sql, &UserId::new(user))
        .await;
    access_log.flush().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        let kind = result
            .error_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        bail!("query failed: {}", kind);
    }
    Ok(())
}

pub fn run_validate(ctx: &Context, sql: &str) -> Result<()> {
    let validator = SqlValidator::new(&ctx.config.validator);
    match validator.validate(sql) {
        Ok(validated) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "valid": true,
                    "sql": validated.sql,
                }))?
            );
            Ok(())
        }
        Err(rejection) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "valid": false,
                    "rule": rejection.rule.as_str(),
                    "reason": rejection.reason,
                }))?
            );
            bail!("{}", rejection)
        }
    }
}

pub async fn run_resolve(ctx: &Context, user: &str) -> Result<()> {
    let resolver = ctx.resolver(ctx.app_pool().await?);
    let user_id = UserId::new(user);

    let mapping = resolver.lookup_mapping(&user_id).await?;
    let search_path = resolver.search_path_for(mapping.as_ref());
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "user_id": user,
            "database": resolver.database_name(),
            "schema": mapping.as_ref().map(|m| m.schema_name.clone()),
            "role": mapping.as_ref().map(|m| m.role_name.clone()),
            "search_path": search_path.schemas(),
        }))?
    );
    Ok(())
}
