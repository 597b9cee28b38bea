use calserver::config::AppConfig;
use calserver::server::run_server;
use calserver::shared::state::AppState;
use calserver::shared::utils::{create_conn, run_migrations};
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();
    let database_url = config.database_url();

    let pool = match create_conn(&database_url) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {}", e);
            return Err(e.into());
        }
    };
    run_migrations(&pool).map_err(|e| anyhow::anyhow!("Migrations failed: {}", e))?;

    let app_state = Arc::new(AppState::new(pool));

    #[cfg(feature = "scheduler")]
    {
        use calserver::tasks::MaintenanceScheduler;
        match MaintenanceScheduler::new(app_state.clone()) {
            Ok(scheduler) => scheduler.start(),
            Err(e) => error!("Maintenance scheduler disabled: {}", e),
        }
    }

    info!(
        "Starting calendar server on {}:{}",
        config.server.host, config.server.port
    );
    run_server(app_state, &config.server.host, config.server.port).await?;
    Ok(())
}
