use thiserror::Error;

/// A prompt template field that neither the caller nor the agent could supply.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("missing prompt input `{field}` for chain `{chain}`")]
pub struct MissingInputError {
    pub chain: String,
    pub field: String,
}

/// Failure of a single completion call. Transport and parse failures are kept apart so
/// callers can tell a dead provider from a model that ignored the output format.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion transport failure: {0}")]
    Transport(String),
    #[error("completion provider returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("completion provider returned an empty response")]
    EmptyResponse,
    #[error("could not parse structured completion output: {message}")]
    Parse { message: String, raw: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error(transparent)]
    MissingInput(#[from] MissingInputError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("prompt template for chain `{chain}` failed to render: {message}")]
    Template { chain: String, message: String },
    #[error("agent `{agent}` has no chain named `{chain}`")]
    UnknownChain { agent: String, chain: String },
    #[error("no agent registered under `{0}`")]
    UnknownAgent(String),
    #[error("guidance index {0} does not name an agent")]
    UnknownAgentIndex(usize),
    #[error("chain `{chain}` produced {found} output where {expected} output was expected")]
    UnexpectedOutput { chain: String, expected: &'static str, found: &'static str },
}

/// The guidance agent gave up choosing the next agent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not route the turn after {attempts} attempt(s): {last_error}")]
pub struct RoutingError {
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

pub const MISSING_CHAT_PARAMETERS: &str = "session_id and message parameters are required.";

impl InterfaceError {
    pub fn missing_chat_parameters(correlation_id: impl Into<String>) -> Self {
        Self::BadRequest {
            message: MISSING_CHAT_PARAMETERS.to_owned(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Text placed in the `error` field of the JSON body.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. } => message.clone(),
            Self::Internal { message, .. } => format!("Internal server error: {message}"),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. } | Self::Internal { correlation_id, .. } => {
                correlation_id
            }
        }
    }
}

impl TurnError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError::Internal { message: self.to_string(), correlation_id: correlation_id.into() }
    }
}
