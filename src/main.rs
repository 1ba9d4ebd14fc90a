use anyhow::anyhow;
use anyhow::Context;
use dropshot::ConfigLogging;
use slog::error;
use slog::info;
use std::sync::Arc;

mod config;
mod cors;
mod http;
mod model;
mod pool;
mod schema;
mod store;

type DbConnection = diesel::PgConnection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::from_env().context("loading configuration")?;
    let config_logging =
        ConfigLogging::StderrTerminal { level: config.log_level };
    let config_dropshot = dropshot::ConfigDropshot {
        bind_address: config.bind_address,
        ..Default::default()
    };
    let log =
        config_logging.to_logger("visit-counter").context("creating logger")?;

    let cors = cors::CorsPolicy::new(&config.cors_origin)?;
    let allowed_origins = cors::OriginAllowList::new(config.allowed_origins);

    let store = match connect_store(
        &log,
        &config.database_url,
        config.pool_size,
        config.visits_seed,
    )
    .await
    {
        Ok(store) => store,
        Err(error) => {
            error!(&log, "failed to connect database";
                "error_message" => #%error);
            return Err(error);
        }
    };

    info!(&log, "setting up dropshot server");
    let api_context =
        http::VisitorContext::new(Arc::new(store), cors, allowed_origins);
    let server =
        http::create_dropshot_server(config_dropshot, log.clone(), api_context)
            .await?;
    info!(&log, "server is listening";
        "local_address" => ?server.local_addr());
    server.await.map_err(|error| anyhow!("waiting for server: {:#}", error))
}

async fn connect_store(
    log: &slog::Logger,
    db_url: &str,
    pool_size: u32,
    seed: i64,
) -> anyhow::Result<store::PgCounterStore> {
    let pool = pool::create_pool(log.clone(), db_url, pool_size)
        .await
        .context("setting up database pool")?;
    let store = store::PgCounterStore::new(pool, seed);
    store.ensure_schema().await?;
    Ok(store)
}
