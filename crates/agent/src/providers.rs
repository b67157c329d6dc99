//! HTTP completion clients.
//!
//! OpenAI and Ollama share the OpenAI chat completions wire format; Anthropic
//! uses its messages API. Every failure is reported as a [`CompletionError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parlor_core::config::{LlmConfig, LlmProvider};
use parlor_core::CompletionError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::llm::{CompletionRequest, LlmClient};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("llm.api_key is required for provider `{0}`")]
    MissingApiKey(&'static str),
}

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey(LlmProvider::OpenAi.as_str()))?;
            Arc::new(ChatCompletionsClient::new(
                http,
                base_url(config, OPENAI_BASE_URL),
                Some(api_key),
            ))
        }
        LlmProvider::Ollama => {
            Arc::new(ChatCompletionsClient::new(http, base_url(config, OLLAMA_BASE_URL), None))
        }
        LlmProvider::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey(LlmProvider::Anthropic.as_str()))?;
            Arc::new(AnthropicClient::new(http, base_url(config, ANTHROPIC_BASE_URL), api_key))
        }
    };

    Ok(client)
}

fn base_url(config: &LlmConfig, fallback: &str) -> String {
    config.base_url.as_deref().unwrap_or(fallback).trim_end_matches('/').to_string()
}

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct ChatCompletionsClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl ChatCompletionsClient {
    pub fn new(http: Client, base_url: String, api_key: Option<SecretString>) -> Self {
        Self { http, endpoint: format!("{base_url}/v1/chat/completions"), api_key }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": [
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.human },
            ],
        });

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        debug!(
            event_name = "llm.request.sent",
            endpoint = %self.endpoint,
            model = %request.model,
            "sending chat completion request"
        );
        let response = builder.send().await.map_err(transport_error)?;
        let payload: ChatCompletionResponse = decode(response).await?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

/// Anthropic `/v1/messages` client.
pub struct AnthropicClient {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl AnthropicClient {
    pub fn new(http: Client, base_url: String, api_key: SecretString) -> Self {
        Self { http, endpoint: format!("{base_url}/v1/messages"), api_key }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessagesContent>,
}

#[derive(Deserialize)]
struct MessagesContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = json!({
            "model": request.model,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [ChatMessage { role: "user", content: &request.human }],
        });

        debug!(
            event_name = "llm.request.sent",
            endpoint = %self.endpoint,
            model = %request.model,
            "sending messages request"
        );
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let payload: MessagesResponse = decode(response).await?;

        let text = payload
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text)
    }
}

fn transport_error(error: reqwest::Error) -> CompletionError {
    CompletionError::Transport(error.to_string())
}

async fn decode<T>(response: reqwest::Response) -> Result<T, CompletionError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CompletionError::Api {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|error| CompletionError::Transport(format!("invalid response envelope: {error}")))
}

#[cfg(test)]
mod tests {
    use parlor_core::config::{LlmConfig, LlmProvider};
    use parlor_core::CompletionError;
    use reqwest::Client;
    use secrecy::SecretString;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::{
        base_url, client_from_config, AnthropicClient, ChatCompletionsClient, ProviderError,
        ERROR_BODY_LIMIT, OLLAMA_BASE_URL,
    };
    use crate::llm::{CompletionRequest, LlmClient};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "Be brief.".to_string(),
            human: "Hi".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.2,
        }
    }

    /// Answers exactly one HTTP request with a canned response and hands back the
    /// raw request it received, lowercased.
    async fn serve_once(
        status: &'static str,
        body: impl Into<String>,
    ) -> (String, JoinHandle<String>) {
        let body = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let address = listener.local_addr().expect("stub address");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let received = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write response");
            let _ = socket.shutdown().await;
            received.to_ascii_lowercase()
        });
        (format!("http://{address}"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.expect("read request");
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            let text = String::from_utf8_lossy(&buffer);
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= header_end + 4 + content_length {
                break;
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    fn chat_client(base_url: String) -> ChatCompletionsClient {
        ChatCompletionsClient::new(
            Client::new(),
            base_url,
            Some(SecretString::from("sk-test".to_string())),
        )
    }

    fn anthropic_client(base_url: String) -> AnthropicClient {
        AnthropicClient::new(Client::new(), base_url, SecretString::from("sk-ant".to_string()))
    }

    #[tokio::test]
    async fn chat_completions_returns_first_choice_content() {
        let (url, stub) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"content":"Hello!"}},{"message":{"content":"ignored"}}]}"#,
        )
        .await;

        let reply = chat_client(url).complete(&request()).await.expect("completion");

        assert_eq!(reply, "Hello!");
        let received = stub.await.expect("stub");
        assert!(received.starts_with("post /v1/chat/completions "));
        assert!(received.contains("authorization: bearer sk-test"));
        assert!(received.contains(r#""model":"gpt-4""#));
        assert!(received.contains(r#""role":"system""#));
    }

    #[tokio::test]
    async fn chat_completions_without_key_sends_no_authorization() {
        let (url, stub) =
            serve_once("200 OK", r#"{"choices":[{"message":{"content":"local"}}]}"#).await;
        let client = ChatCompletionsClient::new(Client::new(), url, None);

        let reply = client.complete(&request()).await.expect("completion");

        assert_eq!(reply, "local");
        assert!(!stub.await.expect("stub").contains("authorization:"));
    }

    #[tokio::test]
    async fn error_status_maps_to_api_error_with_truncated_body() {
        let (url, _stub) = serve_once("429 Too Many Requests", "q".repeat(2000)).await;

        let error = chat_client(url).complete(&request()).await.expect_err("rate limited");

        assert!(
            matches!(&error, CompletionError::Api { status: 429, body } if body.len() == ERROR_BODY_LIMIT),
            "unexpected error: {error:?}"
        );
    }

    #[tokio::test]
    async fn empty_choices_is_an_empty_response() {
        let (url, _stub) = serve_once("200 OK", r#"{"choices":[]}"#).await;

        let error = chat_client(url).complete(&request()).await.expect_err("no choices");

        assert_eq!(error, CompletionError::EmptyResponse);
    }

    #[tokio::test]
    async fn blank_content_is_an_empty_response() {
        let (url, _stub) =
            serve_once("200 OK", r#"{"choices":[{"message":{"content":"  \n"}}]}"#).await;

        let error = chat_client(url).complete(&request()).await.expect_err("blank content");

        assert_eq!(error, CompletionError::EmptyResponse);
    }

    #[tokio::test]
    async fn malformed_envelope_is_a_transport_error() {
        let (url, _stub) = serve_once("200 OK", "<html>gateway</html>").await;

        let error = chat_client(url).complete(&request()).await.expect_err("not json");

        let CompletionError::Transport(message) = &error else {
            panic!("expected transport error, got {error:?}");
        };
        assert!(message.starts_with("invalid response envelope"));
    }

    #[tokio::test]
    async fn anthropic_joins_only_text_blocks() {
        let (url, stub) = serve_once(
            "200 OK",
            r#"{"content":[{"type":"text","text":"Eat "},{"type":"tool_use","id":"t1","name":"x","input":{}},{"type":"text","text":"greens."}]}"#,
        )
        .await;

        let reply = anthropic_client(url).complete(&request()).await.expect("completion");

        assert_eq!(reply, "Eat greens.");
        let received = stub.await.expect("stub");
        assert!(received.starts_with("post /v1/messages "));
        assert!(received.contains("x-api-key: sk-ant"));
        assert!(received.contains("anthropic-version: 2023-06-01"));
        assert!(received.contains(r#""max_tokens":1024"#));
        assert!(received.contains(r#""system":"be brief.""#));
    }

    #[tokio::test]
    async fn anthropic_without_text_blocks_is_an_empty_response() {
        let (url, _stub) =
            serve_once("200 OK", r#"{"content":[{"type":"tool_use","id":"t1"}]}"#).await;

        let error = anthropic_client(url).complete(&request()).await.expect_err("no text");

        assert_eq!(error, CompletionError::EmptyResponse);
    }

    #[tokio::test]
    async fn anthropic_error_status_maps_to_api_error() {
        let (url, _stub) =
            serve_once("401 Unauthorized", r#"{"error":{"type":"authentication_error"}}"#).await;

        let error = anthropic_client(url).complete(&request()).await.expect_err("bad key");

        assert_eq!(
            error,
            CompletionError::Api {
                status: 401,
                body: r#"{"error":{"type":"authentication_error"}}"#.to_string(),
            }
        );
    }

    fn llm_config(provider: LlmProvider) -> LlmConfig {
        LlmConfig { provider, api_key: None, base_url: None, timeout_secs: 5 }
    }

    #[test]
    fn ollama_needs_no_api_key() {
        assert!(client_from_config(&llm_config(LlmProvider::Ollama)).is_ok());
    }

    #[test]
    fn hosted_providers_require_api_key() {
        let error = client_from_config(&llm_config(LlmProvider::OpenAi)).err();
        assert!(matches!(error, Some(ProviderError::MissingApiKey("openai"))));

        let error = client_from_config(&llm_config(LlmProvider::Anthropic)).err();
        assert!(matches!(error, Some(ProviderError::MissingApiKey("anthropic"))));
    }

    #[test]
    fn base_url_falls_back_and_drops_trailing_slash() {
        let mut config = llm_config(LlmProvider::Ollama);
        assert_eq!(base_url(&config, OLLAMA_BASE_URL), "http://localhost:11434");

        config.base_url = Some("http://gpu-box:8080/".to_string());
        assert_eq!(base_url(&config, OLLAMA_BASE_URL), "http://gpu-box:8080");
    }
}
