use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parlor_core::InterfaceError;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct ChatState {
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChatError {
    pub error: String,
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

struct ErrorReply(InterfaceError);

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let status = match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ChatError { error: self.0.user_message() })).into_response()
    }
}

async fn chat(
    State(state): State<ChatState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ErrorReply> {
    let correlation_id = Uuid::new_v4().to_string();

    let (session_id, message) = match payload {
        Ok(Json(ChatRequest { session_id: Some(session_id), message: Some(message) }))
            if !session_id.is_empty() && !message.is_empty() =>
        {
            (session_id, message)
        }
        Ok(_) => {
            warn!(
                event_name = "chat.request.rejected",
                correlation_id = %correlation_id,
                "chat request missing session_id or message"
            );
            return Err(ErrorReply(InterfaceError::missing_chat_parameters(correlation_id)));
        }
        Err(rejection) => {
            warn!(
                event_name = "chat.request.rejected",
                correlation_id = %correlation_id,
                error = %rejection,
                "chat request body could not be read"
            );
            return Err(ErrorReply(InterfaceError::missing_chat_parameters(correlation_id)));
        }
    };

    let (orchestrator, created) = state.sessions.get_or_create(&session_id);
    let mut orchestrator = orchestrator.lock().await;

    match orchestrator.respond(message).await {
        Ok(response) => {
            info!(
                event_name = "chat.turn.completed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                new_session = created,
                "chat turn completed"
            );
            Ok(Json(ChatResponse { response }))
        }
        Err(turn_error) => {
            let interface = turn_error.into_interface(correlation_id);
            error!(
                event_name = "chat.turn.failed",
                correlation_id = %interface.correlation_id(),
                session_id = %session_id,
                error = %interface,
                "chat turn failed"
            );
            Err(ErrorReply(interface))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use parlor_agent::{
        AgentRuntime, CompletionRequest, LlmClient, RuntimeSettings, ScriptedClient,
    };
    use parlor_core::config::AppConfig;
    use parlor_core::{AgentCatalog, CompletionError, Persona};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ChatState};
    use crate::sessions::SessionStore;

    const ROUTE_TO_CONVERSATION: &str =
        r#"{"agent_index": 1, "agent_name": "ConversationAgent", "reason": "small talk"}"#;

    /// Holds every completion long enough for a second request to arrive mid-turn.
    struct SlowClient {
        inner: ScriptedClient,
        delay: Duration,
    }

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            tokio::time::sleep(self.delay).await;
            self.inner.complete(request).await
        }
    }

    fn app(client: Arc<dyn LlmClient>) -> (Router, Arc<SessionStore>) {
        let runtime = Arc::new(AgentRuntime::new(
            Arc::new(AgentCatalog::embedded().expect("catalog")),
            Persona::embedded().expect("persona"),
            client,
            RuntimeSettings::default(),
        ));
        let sessions = Arc::new(SessionStore::with_limits(
            runtime,
            &AppConfig::default().assistant,
            16,
            Duration::from_secs(600),
        ));
        (router(ChatState { sessions: sessions.clone() }), sessions)
    }

    async fn post(router: Router, body: String) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn successful_turn_returns_response() {
        let client =
            Arc::new(ScriptedClient::with_replies([ROUTE_TO_CONVERSATION, "Hi! I'm Tim."]));
        let (router, _) = app(client);

        let (status, body) =
            post(router, json!({"session_id": "s1", "message": "Hello"}).to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"response": "Hi! I'm Tim."}));
    }

    #[tokio::test]
    async fn missing_message_is_rejected_without_creating_session() {
        let (router, sessions) = app(Arc::new(ScriptedClient::new()));

        let (status, body) = post(router, json!({"session_id": "s1"}).to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "session_id and message parameters are required."}));
        assert!(!sessions.contains("s1"));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn empty_fields_and_malformed_json_are_rejected() {
        let (router, sessions) = app(Arc::new(ScriptedClient::new()));

        let (status, body) =
            post(router.clone(), json!({"session_id": "", "message": "Hi"}).to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "session_id and message parameters are required.");

        let (status, body) = post(router, "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "session_id and message parameters are required.");
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn same_session_shares_memory_across_requests() {
        let client = Arc::new(ScriptedClient::with_replies([
            ROUTE_TO_CONVERSATION,
            "Nice to meet you!",
            ROUTE_TO_CONVERSATION,
            "Oatmeal is a good start.",
        ]));
        let (router, _) = app(client.clone());

        post(router.clone(), json!({"session_id": "s1", "message": "I'm Ana"}).to_string()).await;
        let (status, _) = post(
            router,
            json!({"session_id": "s1", "message": "What should I eat?"}).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let requests = client.requests();
        let second_conversation = &requests[3];
        assert!(second_conversation.system.contains("User: I'm Ana"));
        assert!(second_conversation.system.contains("Nice to meet you!"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_turns_on_one_session_do_not_interleave() {
        let client = Arc::new(SlowClient {
            inner: ScriptedClient::with_replies([
                ROUTE_TO_CONVERSATION,
                "first reply",
                ROUTE_TO_CONVERSATION,
                "second reply",
            ]),
            delay: Duration::from_millis(50),
        });
        let (router, sessions) = app(client);

        let ((first_status, first), (second_status, second)) = tokio::join!(
            post(router.clone(), json!({"session_id": "s1", "message": "one"}).to_string()),
            post(router, json!({"session_id": "s1", "message": "two"}).to_string()),
        );

        assert_eq!((first_status, second_status), (StatusCode::OK, StatusCode::OK));
        let mut replies = vec![first["response"].clone(), second["response"].clone()];
        replies.sort_by_key(|reply| reply.to_string());
        assert_eq!(replies, vec![json!("first reply"), json!("second reply")]);

        let (orchestrator, created) = sessions.get_or_create("s1");
        assert!(!created);
        let memory = orchestrator.lock().await.memory_snapshot().await;
        let assistant = AppConfig::default().assistant.name;
        let speakers =
            memory.entries().iter().map(|entry| entry.speaker.as_str()).collect::<Vec<_>>();
        assert_eq!(speakers, vec!["User", assistant.as_str(), "User", assistant.as_str()]);
        let messages =
            memory.entries().iter().map(|entry| entry.message.as_str()).collect::<Vec<_>>();
        assert_eq!(messages[1], "first reply");
        assert_eq!(messages[3], "second reply");
        assert_ne!(messages[0], messages[2]);
    }

    #[tokio::test]
    async fn failed_turn_returns_internal_server_error() {
        let client = Arc::new(ScriptedClient::with_replies([ROUTE_TO_CONVERSATION]));
        client.push_error(CompletionError::Transport("connection refused".to_string()));
        let (router, _) = app(client);

        let (status, body) =
            post(router, json!({"session_id": "s1", "message": "Hello"}).to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"error": "Internal server error: completion transport failure: connection refused"})
        );
    }
}
