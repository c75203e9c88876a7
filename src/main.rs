use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coursemark::{
    clock::SystemClock,
    config::{Config, LogFormat, StoreBackend},
    db,
    store::{MemoryStore, PgStore, Store},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let registry = tracing_subscriber::registry().with(EnvFilter::new(&config.log_filter));
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;
            let pool = db::connect(url, config.db_pool_max).await?;
            db::migrate(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
    };

    let state = AppState::new(store, Arc::new(SystemClock), config.settings);
    let app = coursemark::app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        backend = ?config.backend,
        delete_policy = %config.settings.lesson_delete_policy,
        "listening on http://{}",
        addr
    );

    axum::serve(listener, app).await?;
    Ok(())
}
