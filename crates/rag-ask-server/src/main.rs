use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use rag_ask_server::config::Settings;
use rag_ask_server::state::AppState;
use rag_ask_server::vectorstore::{QdrantStore, VectorStore};
use rag_ask_server::build_router;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_ask_server=debug".to_string());

    // LOG_DIR switches JSON logs from stdout to a daily-rolled file.
    let _appender_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rag-ask-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(writer)
                .json()
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
            None
        }
    };

    info!("starting rag-ask-server");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(&settings.store_config())?);
    store.ensure_collection().await?;
    info!(
        collection = %settings.vector_store.collection,
        dim = settings.embedding.dimensions,
        "vector store ready"
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = Arc::new(AppState::build(settings, store));

    if state.embedding.health_check().await {
        info!("embedding service reachable");
    } else {
        info!("embedding service not reachable yet, continuing startup");
    }

    let app = build_router(state);

    info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
