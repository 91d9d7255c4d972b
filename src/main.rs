use std::sync::Arc;

use anyhow::Result;

use parts_chatbot::config::Settings;
use parts_chatbot::logger;
use parts_chatbot::server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::load()?;
    logger::init(&settings.logging)?;

    tracing::info!("Store backend: {:?}", settings.store.backend);
    tracing::info!("Embedding model: {}", settings.openai.embedding_model);
    tracing::info!("Completion model: {}", settings.openai.completion_model);

    let bind_addr = settings.server.bind_addr.clone();
    let state = AppState::from_settings(settings).await?;
    state.responder.store().ensure_schema().await?;

    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Chatbot server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
