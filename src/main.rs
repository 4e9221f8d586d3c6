use std::sync::Arc;
use std::time::Duration;

use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsroom::config::{Config, DEFAULT_SECRETS_PATH};
use newsroom::documents::Documents;
use newsroom::fetcher::Fetcher;
use newsroom::github::GitHubStore;
use newsroom::routes::{self, AppState};
use newsroom::session::SessionStore;
use newsroom::summarizer::GeminiSummarizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsroom=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load secrets; refuse to serve without them
    let secrets_path =
        std::env::var("NEWSROOM_SECRETS").unwrap_or_else(|_| DEFAULT_SECRETS_PATH.to_string());
    let config = match Config::from_environment(&secrets_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Secrets not configured correctly: {}", e);
            return Err(e.into());
        }
    };
    info!("Using repository {}", config.repo_name);

    let settings = &config.settings;
    let store = GitHubStore::new(
        &settings.github_api_url,
        &config.repo_name,
        &config.github_token,
        settings.branch.clone(),
    )?;
    let summarizer = GeminiSummarizer::new(
        &settings.gemini_api_url,
        &config.gemini_api_key,
        &settings.model,
    )?;
    let fetcher = Fetcher::new(settings.max_entries_per_feed)?;

    let state = Arc::new(AppState {
        documents: Documents::new(Arc::new(store)),
        fetcher: Arc::new(fetcher),
        summarizer: Arc::new(summarizer),
        sessions: SessionStore::with_ttl(Duration::from_secs(settings.session_ttl_secs)),
        admin_password: config.admin_password.clone(),
    });

    let app = routes::router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server starting on http://{}", settings.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
