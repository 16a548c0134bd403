//! Recipe Assistant - terminal chat with an LLM cooking helper
//!
//! A session runtime owns the transcript and talks to the model; the
//! terminal UI renders snapshots of it and forwards key presses.

mod agent;
mod config;
mod prefs;
mod render;
mod runtime;
mod session;
mod tracker;
mod transcript;
mod tui;

use agent::{LocalTools, OpenAiAgent};
use config::Config;
use prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
use runtime::SessionHandle;
use session::{Session, SessionConfig};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // The terminal belongs to the UI, so logs go to a file
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recipe_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    tracing::info!(
        model = %config.model,
        base_url = %config.base_url,
        confirm_tools = ?config.confirm_tools,
        "Starting recipe assistant"
    );
    if !config.has_api_key() {
        tracing::warn!("No API key configured. Set OPENAI_API_KEY.");
    }

    let policy = Arc::new(config.confirmation_policy());
    let session = Session::new(
        Arc::clone(&policy),
        SessionConfig {
            continue_after_tools: true,
        },
    );
    let agent = OpenAiAgent::new(&config, Arc::clone(&policy))?;
    let handle = SessionHandle::spawn(session, agent, LocalTools::new());

    let prefs: Arc<dyn PreferenceStore> = match FilePreferences::open(&config.prefs_path) {
        Ok(prefs) => Arc::new(prefs),
        Err(e) => {
            tracing::warn!(error = %e, "Preferences unavailable, using defaults");
            Arc::new(MemoryPreferences::new())
        }
    };

    let app = tui::App::new(handle, policy, prefs, !config.has_api_key()).await?;
    tui::run(app).await?;
    Ok(())
}
