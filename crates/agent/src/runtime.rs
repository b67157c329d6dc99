use std::sync::Arc;

use parlor_core::config::AppConfig;
use parlor_core::{AgentCatalog, CatalogError, Persona, PersonaError};
use thiserror::Error;

use crate::guidance::RetryPolicy;
use crate::invoker::CompletionInvoker;
use crate::llm::LlmClient;
use crate::prompt::PromptRenderer;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeSettings {
    pub memory_window: Option<usize>,
    pub retry: RetryPolicy,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { memory_window: config.memory.window_size, retry: RetryPolicy::from(&config.routing) }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Persona(#[from] PersonaError),
}

/// Read-only state shared by every agent of every session.
pub struct AgentRuntime {
    catalog: Arc<AgentCatalog>,
    persona: Persona,
    renderer: PromptRenderer,
    invoker: CompletionInvoker,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        persona: Persona,
        client: Arc<dyn LlmClient>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            renderer: PromptRenderer::new(catalog.clone()),
            invoker: CompletionInvoker::new(client, catalog.clone()),
            catalog,
            persona,
            settings,
        }
    }

    /// Loads the catalog and persona named by the config, falling back to the
    /// embedded defaults.
    pub fn from_config(config: &AppConfig, client: Arc<dyn LlmClient>) -> Result<Self, RuntimeError> {
        let catalog = AgentCatalog::load(config.catalog.agents_path.as_deref())?;
        let persona = Persona::load(config.catalog.persona_path.as_deref())?;
        Ok(Self::new(Arc::new(catalog), persona, client, RuntimeSettings::from_config(config)))
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn renderer(&self) -> &PromptRenderer {
        &self.renderer
    }

    pub fn invoker(&self) -> &CompletionInvoker {
        &self.invoker
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }
}
