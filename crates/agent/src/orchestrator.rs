//! Per-session coordinator.
//!
//! An orchestrator owns one session's memory and one agent per configured kind.
//! A turn is: record the user input (immediately, before anything can fail),
//! ask the guidance agent for the next agent, run that agent's chains, and record
//! the joined reply. A failed turn leaves the user entry in memory and appends
//! no reply.

use std::collections::BTreeMap;
use std::sync::Arc;

use parlor_core::catalog::AgentKind;
use parlor_core::{AgentError, Memory, RoutingError, TurnError};
use tokio::sync::RwLock;
use tracing::info;

use crate::agent::{Agent, SharedMemory};
use crate::guidance::{self, RoutingDecision};
use crate::runtime::AgentRuntime;

pub const DEFAULT_USER_NAME: &str = "User";

pub struct Orchestrator {
    runtime: Arc<AgentRuntime>,
    assistant_name: String,
    user_name: String,
    memory: SharedMemory,
    user_input: Option<String>,
    agents: Vec<Agent>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<AgentRuntime>, assistant_name: impl Into<String>) -> Self {
        Self::with_memory(runtime, assistant_name, Memory::new())
    }

    pub fn with_memory(
        runtime: Arc<AgentRuntime>,
        assistant_name: impl Into<String>,
        memory: Memory,
    ) -> Self {
        let assistant_name = assistant_name.into();
        let memory = Arc::new(RwLock::new(memory));
        let agents = runtime
            .catalog()
            .agent_kinds()
            .into_iter()
            .map(|kind| Agent::new(kind, runtime.clone(), assistant_name.clone(), memory.clone()))
            .collect();

        Self {
            runtime,
            assistant_name,
            user_name: DEFAULT_USER_NAME.to_string(),
            memory,
            user_input: None,
            agents,
        }
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn set_assistant_name(&mut self, name: impl Into<String>) {
        self.assistant_name = name.into();
        for agent in &mut self.agents {
            agent.set_assistant_name(self.assistant_name.clone());
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn set_user_name(&mut self, name: impl Into<String>) {
        self.user_name = name.into();
    }

    pub fn user_input(&self) -> Option<&str> {
        self.user_input.as_deref()
    }

    pub fn agent_names(&self) -> Vec<&'static str> {
        self.agents.iter().map(Agent::name).collect()
    }

    pub async fn memory_snapshot(&self) -> Memory {
        self.memory.read().await.clone()
    }

    /// Assistant name followed by one numbered line per agent.
    pub fn describe(&self) -> String {
        let mut lines = vec![self.assistant_name.clone()];
        lines.extend(
            self.agents
                .iter()
                .enumerate()
                .map(|(index, agent)| format!("{}. {}", index + 1, agent.name())),
        );
        lines.join("\n")
    }

    /// Appends and returns the opening line of the conversation.
    pub async fn start(&mut self) -> Result<String, AgentError> {
        let greeting =
            self.runtime.catalog().greeting_text(&self.assistant_name).map_err(|error| {
                AgentError::Template { chain: "greeting".to_string(), message: error.to_string() }
            })?;
        self.memory.write().await.append(self.assistant_name.clone(), greeting.clone(), None, None);
        Ok(greeting)
    }

    pub async fn set_user_input(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.memory.write().await.append(self.user_name.clone(), text.clone(), None, None);
        self.user_input = Some(text);
    }

    pub async fn choose_next_agent(&mut self) -> Result<RoutingDecision, RoutingError> {
        let registered = self.agent_names();
        let policy = self.runtime.settings().retry.clone();
        let guidance = self.agents.iter_mut().find(|agent| agent.kind() == AgentKind::Guidance);
        let Some(guidance) = guidance else {
            return Err(RoutingError {
                attempts: 0,
                last_error: AgentError::UnknownAgent(AgentKind::Guidance.name().to_string())
                    .to_string(),
            });
        };

        guidance::choose_next_agent(guidance, &policy, &registered).await
    }

    pub async fn run_agent_by_name(&mut self, name: &str) -> Result<String, AgentError> {
        let user_input = self.user_input.clone();
        let agent = self
            .agents
            .iter_mut()
            .find(|agent| agent.name() == name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;
        if let Some(text) = user_input {
            agent.set_latest_user_text(text);
        }

        let run = agent.run_chains(&BTreeMap::new()).await?;
        let reply = run.joined_text();
        self.memory.write().await.append(
            self.assistant_name.clone(),
            reply.clone(),
            Some(name.to_string()),
            None,
        );
        Ok(reply)
    }

    /// One full turn: record, route, dispatch.
    pub async fn respond(&mut self, text: impl Into<String>) -> Result<String, TurnError> {
        self.set_user_input(text).await;
        let decision = self.choose_next_agent().await?;
        let reply = self.run_agent_by_name(&decision.agent_name).await?;

        info!(
            event_name = "orchestrator.turn.completed",
            agent_name = %decision.agent_name,
            agent_index = decision.agent_index,
            "turn completed"
        );
        Ok(reply)
    }
}
