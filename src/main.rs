use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use events_ingestor::config::Config;
use events_ingestor::health::create_health_api;
use events_ingestor::node::ThorNode;
use events_ingestor::pipeline::{IngestionPipeline, PipelineSettings};
use events_ingestor::registry::CriteriaRegistry;
use events_ingestor::store::postgres::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cfg_path = std::env::args().nth(1).unwrap_or_else(|| "./config.yaml".to_string());
    let cfg = Config::load(&cfg_path)?;

    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    info!("Configuration loaded from {}", cfg_path);

    let db_schema = std::fs::read_to_string(Path::new(&cfg.postgres.schema))?;
    let store = Arc::new(Mutex::new(PgStore::connect(&cfg.postgres.dsn, &db_schema).await?));

    let node_url = cfg.node.url();
    let node = Arc::new(ThorNode::new(&node_url)?);
    info!("Using {:?} node at {}", cfg.node.network, node_url);

    let registry = Arc::new(CriteriaRegistry::from_config(&cfg.contracts)?);

    let mut pipeline = IngestionPipeline::new(node, registry, store, PipelineSettings::from(&cfg));
    pipeline.start().await?;

    let app = create_health_api(pipeline.status());
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health API listening on http://{}", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health API server error: {:?}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    pipeline.stop().await;
    server.abort();

    info!("events-ingestor stopped");
    Ok(())
}
