//! Agent base: a kind tag, its chains in declared order, and the attributes
//! prompt inputs are resolved from.

use std::collections::BTreeMap;
use std::sync::Arc;

use parlor_core::{AgentError, AgentKind, ChainConfig, Memory};
use tokio::sync::RwLock;
use tracing::debug;

use crate::invoker::ChainOutput;
use crate::prompt::PromptInputs;
use crate::runtime::AgentRuntime;

pub type SharedMemory = Arc<RwLock<Memory>>;

pub const PERSONA_DESCRIPTION_FIELD: &str = "persona_description";
pub const PERSONA_ATTRIBUTES_FIELD: &str = "persona_attributes";

/// Per-call overrides of a chain's configured model parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainOverrides {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub verbose: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainParams {
    pub inputs: PromptInputs,
    pub parameters: ChainOverrides,
}

impl ChainParams {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            inputs: PromptInputs::new(),
            parameters: ChainOverrides { temperature: Some(temperature), ..Default::default() },
        }
    }
}

/// Results of one `run_chains` call, in the agent's declared chain order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainRun {
    entries: Vec<(String, ChainOutput)>,
}

impl ChainRun {
    pub fn chain_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn responses(&self) -> Vec<&ChainOutput> {
        self.entries.iter().map(|(_, output)| output).collect()
    }

    /// Chain name followed by its output, for every chain.
    pub fn interleaved(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(name, output)| [name.clone(), output.to_text()])
            .collect()
    }

    pub fn joined_text(&self) -> String {
        self.entries.iter().map(|(_, output)| output.to_text()).collect::<Vec<_>>().join("\n")
    }

    pub fn into_outputs(self) -> Vec<ChainOutput> {
        self.entries.into_iter().map(|(_, output)| output).collect()
    }
}

pub struct Agent {
    kind: AgentKind,
    chains: Vec<Arc<ChainConfig>>,
    assistant_name: String,
    memory: SharedMemory,
    latest_user_text: Option<String>,
    last_run_chain: Option<String>,
    runtime: Arc<AgentRuntime>,
}

impl Agent {
    pub fn new(
        kind: AgentKind,
        runtime: Arc<AgentRuntime>,
        assistant_name: impl Into<String>,
        memory: SharedMemory,
    ) -> Self {
        Self {
            kind,
            chains: runtime.catalog().chains_for(kind),
            assistant_name: assistant_name.into(),
            memory,
            latest_user_text: None,
            last_run_chain: None,
            runtime,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub fn chain_names(&self) -> Vec<&str> {
        self.chains.iter().map(|chain| chain.name.as_str()).collect()
    }

    pub fn last_run_chain(&self) -> Option<&str> {
        self.last_run_chain.as_deref()
    }

    pub fn latest_user_text(&self) -> Option<&str> {
        self.latest_user_text.as_deref()
    }

    pub fn set_latest_user_text(&mut self, text: impl Into<String>) {
        self.latest_user_text = Some(text.into());
    }

    pub fn set_assistant_name(&mut self, name: impl Into<String>) {
        self.assistant_name = name.into();
    }

    pub async fn run_chain(
        &mut self,
        chain_name: &str,
        params: &ChainParams,
    ) -> Result<ChainOutput, AgentError> {
        let chain = self
            .chains
            .iter()
            .find(|chain| chain.name == chain_name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownChain {
                agent: self.name().to_string(),
                chain: chain_name.to_string(),
            })?;
        self.last_run_chain = Some(chain.name.clone());

        let inputs = self.resolve_inputs(&chain, &params.inputs).await;
        let prompt = self.runtime.renderer().render(&chain, &inputs)?;

        let model_name = params.parameters.model_name.as_deref().unwrap_or(&chain.model_name);
        let temperature = params.parameters.temperature.unwrap_or(chain.temperature);
        if params.parameters.verbose.unwrap_or(chain.verbose) {
            debug!(
                event_name = "agent.chain.prompt",
                agent = self.name(),
                chain = %chain.name,
                system = %prompt.system_text,
                human = %prompt.human_text,
                "rendered chain prompt"
            );
        }

        let output = self
            .runtime
            .invoker()
            .invoke(&prompt, model_name, temperature, chain.uses_parser)
            .await?;
        debug!(
            event_name = "agent.chain.completed",
            agent = self.name(),
            chain = %chain.name,
            output_kind = output.kind(),
            "chain completed"
        );
        Ok(output)
    }

    /// Runs every chain of the agent one at a time, in declared order.
    pub async fn run_chains(
        &mut self,
        params: &BTreeMap<String, ChainParams>,
    ) -> Result<ChainRun, AgentError> {
        let defaults = ChainParams::default();
        let names = self.chains.iter().map(|chain| chain.name.clone()).collect::<Vec<_>>();

        let mut run = ChainRun::default();
        for name in names {
            let chain_params = params.get(&name).unwrap_or(&defaults);
            let output = self.run_chain(&name, chain_params).await?;
            run.entries.push((name, output));
        }
        Ok(run)
    }

    // persona first, then caller-supplied values, then agent attributes
    async fn resolve_inputs(&self, chain: &ChainConfig, supplied: &PromptInputs) -> PromptInputs {
        let mut inputs = PromptInputs::new();
        if chain.uses_persona_block {
            let persona = self.runtime.persona();
            inputs.insert(PERSONA_DESCRIPTION_FIELD.to_string(), persona.description.clone());
            inputs.insert(PERSONA_ATTRIBUTES_FIELD.to_string(), persona.attributes.clone());
        }
        for (field, value) in supplied {
            inputs.entry(field.clone()).or_insert_with(|| value.clone());
        }
        for field in &chain.input_field_names {
            if inputs.contains_key(field) {
                continue;
            }
            if let Some(value) = self.attribute(field).await {
                inputs.insert(field.clone(), value);
            }
        }
        inputs
    }

    async fn attribute(&self, field: &str) -> Option<String> {
        match field {
            "ai_name" => Some(self.assistant_name.clone()),
            "memory" => {
                let window = self.runtime.settings().memory_window;
                Some(self.memory.read().await.render_window(window))
            }
            "text" => self.latest_user_text.clone(),
            _ => None,
        }
    }
}
