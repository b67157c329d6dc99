//! Agent runtime for parlor.
//!
//! A session is driven by an [`Orchestrator`] that owns the session memory and
//! one [`Agent`] per configured kind:
//! 1. **Record** - the user message is appended to memory as soon as it arrives
//! 2. **Route** - the guidance agent picks the next agent (`guidance`), with a
//!    bounded retry
//! 3. **Dispatch** - the chosen agent runs its chains in declared order and the
//!    joined reply is appended to memory
//!
//! Completions go through the [`LlmClient`] seam; `providers` holds the HTTP
//! clients and [`ScriptedClient`] replays canned outcomes offline.

pub mod agent;
pub mod guidance;
pub mod invoker;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod runtime;

pub use agent::{Agent, ChainOverrides, ChainParams, ChainRun, SharedMemory};
pub use guidance::{RetryPolicy, RoutingDecision};
pub use invoker::{ChainOutput, CompletionInvoker, GuidanceResult};
pub use llm::{CompletionRequest, LlmClient, ScriptedClient};
pub use orchestrator::Orchestrator;
pub use prompt::{PromptInputs, PromptRenderer, RenderedPrompt};
pub use providers::{client_from_config, ProviderError};
pub use runtime::{AgentRuntime, RuntimeError, RuntimeSettings};
