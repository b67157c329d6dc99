use std::sync::Arc;

use axum::Router;
use parlor_agent::{client_from_config, AgentRuntime, LlmClient, ProviderError, RuntimeError};
use parlor_core::config::AppConfig;
use thiserror::Error;
use tracing::info;

use crate::chat::{self, ChatState};
use crate::health;
use crate::sessions::SessionStore;

pub struct Application {
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
}

impl Application {
    pub fn router(&self) -> Router {
        chat::router(ChatState { sessions: self.sessions.clone() })
            .merge(health::router(self.sessions.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("completion client setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[from] RuntimeError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );
    let client = client_from_config(&config.llm)?;
    bootstrap_with_client(config, client)
}

pub fn bootstrap_with_client(
    config: AppConfig,
    client: Arc<dyn LlmClient>,
) -> Result<Application, BootstrapError> {
    let runtime = Arc::new(AgentRuntime::from_config(&config, client)?);
    info!(
        event_name = "system.bootstrap.catalog_loaded",
        correlation_id = "bootstrap",
        agents = runtime.catalog().agent_names().len(),
        "agent catalog and persona loaded"
    );

    let sessions = Arc::new(SessionStore::new(runtime, &config.assistant, &config.sessions));
    Ok(Application { config, sessions })
}
