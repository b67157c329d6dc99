//! Next-agent selection with a bounded retry.
//!
//! The guidance agent runs its single parsed chain and the answer is resolved
//! with name priority: a non-blank `agent_name` is trusted as-is and the index is
//! not cross-checked; a blank name is re-derived from the catalog index table.
//! Any failure (completion, parse, lookup) consumes one attempt.

use std::collections::BTreeMap;
use std::time::Duration;

use parlor_core::config::RoutingConfig;
use parlor_core::{AgentError, RoutingError};
use tracing::{debug, warn};

use crate::agent::{Agent, ChainParams};
use crate::invoker::{ChainOutput, GuidanceResult};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub temperature: f32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, temperature: 0.5, backoff: Duration::ZERO }
    }
}

impl From<&RoutingConfig> for RetryPolicy {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            temperature: config.temperature,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingDecision {
    pub agent_index: usize,
    pub agent_name: String,
    pub reason: String,
}

pub async fn choose_next_agent(
    guidance: &mut Agent,
    policy: &RetryPolicy,
    registered: &[&str],
) -> Result<RoutingDecision, RoutingError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match attempt_once(guidance, policy, registered).await {
            Ok(decision) => {
                debug!(
                    event_name = "agent.guidance.routed",
                    attempt,
                    agent_index = decision.agent_index,
                    agent_name = %decision.agent_name,
                    reason = %decision.reason,
                    "guidance chose next agent"
                );
                return Ok(decision);
            }
            Err(error) => {
                warn!(
                    event_name = "agent.guidance.attempt_failed",
                    attempt,
                    max_attempts = attempts,
                    error = %error,
                    "guidance attempt failed"
                );
                last_error = error.to_string();
                if attempt < attempts && !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(RoutingError { attempts, last_error })
}

async fn attempt_once(
    guidance: &mut Agent,
    policy: &RetryPolicy,
    registered: &[&str],
) -> Result<RoutingDecision, AgentError> {
    let chain_name = guidance
        .chain_names()
        .first()
        .map(|name| name.to_string())
        .ok_or_else(|| AgentError::UnknownChain {
            agent: guidance.name().to_string(),
            chain: "<guidance>".to_string(),
        })?;
    let params =
        BTreeMap::from([(chain_name.clone(), ChainParams::with_temperature(policy.temperature))]);

    let run = guidance.run_chains(&params).await?;
    let result = match run.into_outputs().into_iter().next() {
        Some(ChainOutput::Guidance(result)) => result,
        Some(other) => {
            return Err(AgentError::UnexpectedOutput {
                chain: chain_name,
                expected: "guidance",
                found: other.kind(),
            })
        }
        None => {
            return Err(AgentError::UnknownChain {
                agent: guidance.name().to_string(),
                chain: chain_name,
            })
        }
    };

    resolve(result, guidance, registered)
}

fn resolve(
    result: GuidanceResult,
    guidance: &Agent,
    registered: &[&str],
) -> Result<RoutingDecision, AgentError> {
    let trimmed = result.agent_name.trim();
    let agent_name = if trimmed.is_empty() {
        guidance
            .runtime()
            .catalog()
            .agent_name_at(result.agent_index)
            .map(str::to_string)
            .ok_or(AgentError::UnknownAgentIndex(result.agent_index))?
    } else {
        trimmed.to_string()
    };

    if !registered.contains(&agent_name.as_str()) {
        return Err(AgentError::UnknownAgent(agent_name));
    }

    Ok(RoutingDecision { agent_index: result.agent_index, agent_name, reason: result.reason })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parlor_core::{AgentCatalog, AgentKind, CompletionError, Memory, Persona};
    use tokio::sync::RwLock;

    use super::{choose_next_agent, RetryPolicy, RoutingDecision};
    use crate::agent::Agent;
    use crate::llm::ScriptedClient;
    use crate::runtime::{AgentRuntime, RuntimeSettings};

    const REGISTERED: [&str; 2] = ["GuidanceAgent", "ConversationAgent"];

    fn guidance_agent(client: Arc<ScriptedClient>) -> Agent {
        let runtime = Arc::new(AgentRuntime::new(
            Arc::new(AgentCatalog::embedded().expect("catalog")),
            Persona::embedded().expect("persona"),
            client,
            RuntimeSettings::default(),
        ));
        let mut memory = Memory::new();
        memory.append("User", "Hi", None, None);
        Agent::new(AgentKind::Guidance, runtime, "Tim", Arc::new(RwLock::new(memory)))
    }

    #[tokio::test]
    async fn trusts_non_blank_name() {
        let client = Arc::new(ScriptedClient::with_replies([
            r#"{"agent_index": 1, "agent_name": "ConversationAgent", "reason": "chat"}"#,
        ]));
        let mut agent = guidance_agent(client.clone());

        let decision =
            choose_next_agent(&mut agent, &RetryPolicy::default(), &REGISTERED).await.expect("route");

        assert_eq!(
            decision,
            RoutingDecision {
                agent_index: 1,
                agent_name: "ConversationAgent".to_string(),
                reason: "chat".to_string(),
            }
        );
        let request = &client.requests()[0];
        assert!((request.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(request.model, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn name_is_not_cross_checked_against_index() {
        let client = Arc::new(ScriptedClient::with_replies([
            r#"{"agent_index": 0, "agent_name": "ConversationAgent", "reason": "x"}"#,
        ]));
        let mut agent = guidance_agent(client);

        let decision =
            choose_next_agent(&mut agent, &RetryPolicy::default(), &REGISTERED).await.expect("route");

        assert_eq!(decision.agent_index, 0);
        assert_eq!(decision.agent_name, "ConversationAgent");
    }

    #[tokio::test]
    async fn blank_name_is_derived_from_index_table() {
        let client = Arc::new(ScriptedClient::with_replies([
            r#"{"agent_index": 1, "agent_name": "   ", "reason": "x"}"#,
        ]));
        let mut agent = guidance_agent(client);

        let decision =
            choose_next_agent(&mut agent, &RetryPolicy::default(), &REGISTERED).await.expect("route");

        assert_eq!(decision.agent_index, 1);
        assert_eq!(decision.agent_name, "ConversationAgent");
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let client = Arc::new(ScriptedClient::new());
        client.push_error(CompletionError::Transport("connection reset".to_string()));
        client.push_reply("no json here");
        client.push_reply(r#"{"agent_index": 1, "agent_name": "ConversationAgent", "reason": "x"}"#);
        let mut agent = guidance_agent(client.clone());

        let decision =
            choose_next_agent(&mut agent, &RetryPolicy::default(), &REGISTERED).await.expect("route");

        assert_eq!(decision.agent_name, "ConversationAgent");
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn three_failures_raise_routing_error() {
        let client = Arc::new(ScriptedClient::with_replies([
            r#"{"agent_index": 1, "agent_name": "ExamAgent", "reason": "x"}"#,
            r#"{"agent_index": 7, "agent_name": "", "reason": "x"}"#,
            "garbage",
        ]));
        client.push_reply(r#"{"agent_index": 1, "agent_name": "ConversationAgent", "reason": "x"}"#);
        let mut agent = guidance_agent(client.clone());

        let error = choose_next_agent(&mut agent, &RetryPolicy::default(), &REGISTERED)
            .await
            .expect_err("should exhaust attempts");

        assert_eq!(error.attempts, 3);
        assert!(error.last_error.contains("structured completion output"));
        assert_eq!(client.requests().len(), 3);
        assert_eq!(client.remaining(), 1);
    }

    #[tokio::test]
    async fn attempts_follow_policy() {
        let client = Arc::new(ScriptedClient::new());
        let mut agent = guidance_agent(client.clone());
        let policy = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };

        let error = choose_next_agent(&mut agent, &policy, &REGISTERED).await.expect_err("fail");

        assert_eq!(error.attempts, 1);
        assert_eq!(client.requests().len(), 1);
    }
}
