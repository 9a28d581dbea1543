use anyhow::Context;
use gd_scheduler::config::GdConfig;
use gd_scheduler::server;
use gd_scheduler::services::AppContext;
use gd_scheduler::store::Store;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = GdConfig::load().context("loading configuration")?;
    if config.api_keys().is_empty() {
        tracing::warn!("no AI credentials configured; rooms will be created without scripts");
    }

    let store = Store::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;

    let ctx = AppContext::new(config, store);
    server::start_server(ctx).await
}
