use anyhow::{bail, Result};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use returns_engine::{config, db, migrator::Migrator};

/// Applies or rolls back the schema.
///
/// `migration [up|down|status]`, defaulting to `up`. The database URL comes
/// from the regular configuration (`APP__DATABASE_URL` overrides it).
#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    info!(command = %command, "Starting database migration");

    match command.as_str() {
        "up" => returns_engine::migrator::run_migration(cfg.database_url()).await?,
        "down" => {
            let pool = db::establish_connection_from_app_config(&cfg).await?;
            Migrator::down(&pool, Some(1)).await?;
            info!("Rolled back the latest migration");
        }
        "status" => {
            let pool = db::establish_connection_from_app_config(&cfg).await?;
            Migrator::status(&pool).await?;
        }
        other => bail!("unknown migration command '{}'; expected up, down or status", other),
    }

    Ok(())
}
