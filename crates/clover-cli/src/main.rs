use anyhow::Result;
use clap::{Parser, Subcommand};
use clover_core::{LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::context::Context;

#[derive(Parser, Debug)]
#[command(name = "clover", version, about = "Role-scoped SQL access to tenant data")]
struct Cli {
    /// Configuration file. Defaults are used when the default file is absent.
    #[arg(long, global = true, env = "CLOVER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a SELECT for a user under their database role and print the result as JSON.
    Query {
        #[arg(long)]
        user: String,
        #[arg(long)]
        sql: String,
    },

    /// Check a statement against the validator policy without running it.
    Validate {
        #[arg(long)]
        sql: String,
    },

    /// Print the enriched schema of the data database.
    Schema {
        /// Record the fetch in the access log on behalf of this user.
        #[arg(long)]
        user: Option<String>,
    },

    /// Show the role mapping and search path a user resolves to.
    Resolve {
        #[arg(long)]
        user: String,
    },

    /// Maintain table descriptions.
    Describe {
        #[command(subcommand)]
        cmd: DescribeCommand,
    },

    /// Create or update a user's role and grant read access in a schema.
    Grant {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "public")]
        schema: String,
        /// Tables to grant. All tables of the schema when omitted.
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Revoke a user's access to a schema and drop the role.
    Revoke {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "public")]
        schema: String,
    },

    /// Create the application database tables.
    Migrate,

    /// Print a user's most recent queries, newest first.
    History {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = clover_store::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Access log statistics and schema access checks.
    Access {
        #[command(subcommand)]
        cmd: AccessCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DescribeCommand {
    /// Save (upsert) a table description from a JSON file.
    Save {
        #[arg(long)]
        table: String,
        /// JSON file with `description`, `columns` and optional `object_type`.
        #[arg(long)]
        file: PathBuf,
    },
    /// Print one table description.
    Get {
        #[arg(long)]
        table: String,
    },
    /// List all descriptions of the data database.
    List,
    /// Delete one table description.
    Delete {
        #[arg(long)]
        table: String,
    },
}

#[derive(Subcommand, Debug)]
enum AccessCommand {
    /// Per-user access statistics.
    Stats {
        #[arg(long)]
        user: String,
        /// Only entries from the last N days.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Summary of one UTC day (YYYY-MM-DD, default today).
    Report {
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Compare what a user's roles can read with their mappings.
    Check {
        #[arg(long)]
        user: String,
    },
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::load(cli.config.as_deref())?;
    init_tracing(&ctx.config.logging);

    match cli.cmd {
        Command::Query { user, sql } => commands::query::run_query(&ctx, &user, &sql).await?,
        Command::Validate { sql } => commands::query::run_validate(&ctx, &sql)?,
        Command::Schema { user } => commands::schema::run_schema(&ctx, user.as_deref()).await?,
        Command::Resolve { user } => commands::query::run_resolve(&ctx, &user).await?,
        Command::Describe { cmd } => match cmd {
            DescribeCommand::Save { table, file } => {
                commands::describe::run_save(&ctx, &table, &file).await?
            }
            DescribeCommand::Get { table } => commands::describe::run_get(&ctx, &table).await?,
            DescribeCommand::List => commands::describe::run_list(&ctx).await?,
            DescribeCommand::Delete { table } => {
                commands::describe::run_delete(&ctx, &table).await?
            }
        },
        Command::Grant {
            user,
            schema,
            tables,
        } => commands::roles::run_grant(&ctx, &user, &schema, &tables).await?,
        Command::Revoke { user, schema } => {
            commands::roles::run_revoke(&ctx, &user, &schema).await?
        }
        Command::Migrate => commands::roles::run_migrate(&ctx).await?,
        Command::History { user, limit } => {
            commands::history::run_history(&ctx, &user, limit).await?
        }
        Command::Access { cmd } => match cmd {
            AccessCommand::Stats { user, days } => {
                commands::access::run_stats(&ctx, &user, days).await?
            }
            AccessCommand::Report { date } => commands::access::run_report(&ctx, date).await?,
            AccessCommand::Check { user } => commands::access::run_check(&ctx, &user).await?,
        },
    }

    Ok(())
}
