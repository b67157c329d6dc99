use std::sync::Arc;

use parlor_core::{AgentCatalog, CompletionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompt::RenderedPrompt;

/// Structured answer of the guidance chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuidanceResult {
    pub agent_index: usize,
    pub agent_name: String,
    pub reason: String,
}

impl GuidanceResult {
    pub fn format_instructions() -> &'static str {
        GUIDANCE_FORMAT_INSTRUCTIONS
    }
}

const GUIDANCE_FORMAT_INSTRUCTIONS: &str = r#"The output should be formatted as a JSON instance that conforms to the JSON schema below.

Here is the output schema:
```
{"properties": {"agent_index": {"description": "next agent to run", "type": "integer"}, "agent_name": {"description": "Name of chosen agent without space for example; 'ConversationAgent'", "type": "string"}, "reason": {"description": "reason to select this agent", "type": "string"}}, "required": ["agent_index", "agent_name", "reason"]}
```"#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainOutput {
    Text(String),
    Guidance(GuidanceResult),
}

impl ChainOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Guidance(_) => "guidance",
        }
    }

    /// Text form used when replies are joined into memory.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Guidance(result) => serde_json::to_string(result).unwrap_or_else(|_| {
                format!("{} ({}): {}", result.agent_name, result.agent_index, result.reason)
            }),
        }
    }
}

/// Sends rendered prompts to the completion service and parses structured output.
/// It never retries.
#[derive(Clone)]
pub struct CompletionInvoker {
    client: Arc<dyn LlmClient>,
    catalog: Arc<AgentCatalog>,
}

impl CompletionInvoker {
    pub fn new(client: Arc<dyn LlmClient>, catalog: Arc<AgentCatalog>) -> Self {
        Self { client, catalog }
    }

    pub async fn invoke(
        &self,
        prompt: &RenderedPrompt,
        model_name: &str,
        temperature: f32,
        uses_parser: bool,
    ) -> Result<ChainOutput, CompletionError> {
        let request = CompletionRequest {
            system: prompt.system_text.clone(),
            human: prompt.human_text.clone(),
            model: model_name.to_string(),
            temperature,
        };
        let raw = self.client.complete(&request).await?;

        if uses_parser {
            parse_guidance(&raw, &self.catalog).map(ChainOutput::Guidance)
        } else {
            Ok(ChainOutput::Text(raw.trim().to_string()))
        }
    }
}

#[derive(Deserialize)]
struct RawGuidance {
    agent_index: Value,
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Accepts the JSON object anywhere in the reply (models like to wrap it in prose
/// or code fences). The index may be a number, a numeric string or a letter alias.
pub fn parse_guidance(raw: &str, catalog: &AgentCatalog) -> Result<GuidanceResult, CompletionError> {
    let parse_error =
        |message: String| CompletionError::Parse { message, raw: raw.to_string() };

    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(parse_error("no JSON object found in completion".to_string()));
    };
    if end < start {
        return Err(parse_error("no JSON object found in completion".to_string()));
    }

    let parsed: RawGuidance = serde_json::from_str(&raw[start..=end])
        .map_err(|error| parse_error(error.to_string()))?;

    let agent_index = match &parsed.agent_index {
        Value::Number(number) => number
            .as_u64()
            .and_then(|index| usize::try_from(index).ok())
            .ok_or_else(|| parse_error(format!("agent_index `{number}` is not a valid index")))?,
        Value::String(text) => catalog
            .resolve_index_alias(text)
            .or_else(|| text.trim().parse::<usize>().ok())
            .ok_or_else(|| parse_error(format!("agent_index `{text}` is not a known index")))?,
        other => return Err(parse_error(format!("agent_index has unsupported value `{other}`"))),
    };

    Ok(GuidanceResult {
        agent_index,
        agent_name: parsed.agent_name.unwrap_or_default(),
        reason: parsed.reason.unwrap_or_default(),
    })
}
