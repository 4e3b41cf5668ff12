//! `clover history` - a user's recent queries.

use super::context::Context;
use anyhow::Result;
use clover_store::{PgQueryHistoryStore, QueryHistoryStore};

pub async fn run_history(ctx: &Context, user: &str, limit: usize) -> Result<()> {
    let store = PgQueryHistoryStore::new(ctx.app_pool().await?);
    let entries = store.user_history(user, limit).await?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
