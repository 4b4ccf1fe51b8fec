mod auxiliary;
mod config;
mod db;
mod enrollment;
mod errors;
mod generation;
mod jobs;
mod llm_client;
mod models;
mod routes;
mod state;
mod store;
mod tasks;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auxiliary::archive::{ContentArchive, S3ContentArchive};
use crate::auxiliary::notifier::{LogNotifier, Notifier, WebhookNotifier};
use crate::auxiliary::SideEffects;
use crate::config::{ArchiveSettings, Config};
use crate::db::create_pool;
use crate::generation::generator::GenerationSettings;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::{AppState, PipelineSettings};
use crate::store::postgres::PostgresStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lumen API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(
        &config.database_url,
        config.db_max_connections,
        config.store_timeout,
    )
    .await?;
    let store = Arc::new(PostgresStore::new(db));

    // Initialize LLM client. The HTTP timeout sits just above the generation
    // bound so the coordinator's own timer always fires first.
    let llm = LlmClient::new(
        &config.llm,
        config.generation_timeout + std::time::Duration::from_secs(5),
    )?;
    info!("LLM client initialized (model: {})", llm.model());

    // Side effects: webhook or log notifications, optional S3 / MinIO archive
    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => {
            info!("Notifications via webhook {url}");
            Arc::new(WebhookNotifier::new(reqwest::Client::new(), url.clone()))
        }
        None => Arc::new(LogNotifier),
    };
    let archive: Option<Arc<dyn ContentArchive>> = match &config.archive {
        Some(settings) => {
            let s3 = build_s3_client(settings).await;
            info!("S3 client initialized (bucket: {})", settings.bucket);
            Some(Arc::new(S3ContentArchive::new(s3, settings.bucket.clone())))
        }
        None => None,
    };

    // Build app state
    let state = AppState::new(
        store,
        Arc::new(llm),
        SideEffects::new(notifier, archive),
        PipelineSettings {
            generation: GenerationSettings {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
                timeout: config.generation_timeout,
            },
            require_personalization: config.require_personalization,
            store_timeout: config.store_timeout,
        },
    );

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for MinIO (custom endpoint) or AWS (default chain).
async fn build_s3_client(settings: &ArchiveSettings) -> aws_sdk_s3::Client {
    let mut loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(Region::new("us-east-1"));

    if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key_id,
            secret,
            None,
            None,
            "lumen-static",
        ));
    }
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let s3_config = loader.load().await;
    aws_sdk_s3::Client::new(&s3_config)
}
