//! HTTP server: configuration from the environment, PostgreSQL store, documents from `SETTING_PATH`.

use resource_sdk::{app, AppState, DocumentLoader, PgStore, Settings};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_sdk=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(&settings.db_source)
        .await?;
    let store = PgStore::new(pool, settings.db_schema.clone());
    let loader = DocumentLoader::new(settings.setting_path.clone());
    let state = AppState::new(Arc::new(store), loader, settings.page);

    let router = app(state, settings.body_limit_bytes);
    let listener = TcpListener::bind(&settings.http_server_address).await?;
    tracing::info!(
        "listening on {} (documents: {})",
        listener.local_addr()?,
        settings.setting_path.display()
    );
    axum::serve(listener, router).await?;
    Ok(())
}
