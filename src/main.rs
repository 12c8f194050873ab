use log::{error, info};
use ranked_polls::auth::JwtIssuer;
use ranked_polls::config::Config;
use ranked_polls::db::{Database, PollStore};
use ranked_polls::http::{AppState, create_router};
use ranked_polls::hub::SessionHub;
use ranked_polls::service::PollOrchestrator;
use ranked_polls::tasks;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::new(&config.database_url, config.poll_duration).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let store: Arc<dyn PollStore> = database;
    let tokens = Arc::new(JwtIssuer::new(&config.jwt_secret));
    let service = Arc::new(PollOrchestrator::new(Arc::clone(&store), tokens, config.poll_duration));
    let hub = Arc::new(SessionHub::new(service));

    tokio::spawn(tasks::poll_reaper::reap_expired_polls_task(store, config.reap_interval));

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };
    info!("Listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, create_router(AppState::new(hub))).await {
        error!("Server error: {}", e);
    }
}
