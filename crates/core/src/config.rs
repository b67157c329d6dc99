use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    pub routing: RoutingConfig,
    pub memory: MemoryConfig,
    pub assistant: AssistantConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub max_attempts: u32,
    pub temperature: f32,
    pub backoff_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryConfig {
    pub window_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub name: String,
    pub user_name: String,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogConfig {
    pub agents_path: Option<PathBuf>,
    pub persona_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub assistant_name: Option<String>,
    pub routing_max_attempts: Option<u32>,
    pub memory_window_size: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                timeout_secs: 60,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 5000,
                graceful_shutdown_secs: 15,
            },
            sessions: SessionConfig { max_sessions: 1024, idle_ttl_secs: 3600 },
            routing: RoutingConfig { max_attempts: 3, temperature: 0.5, backoff_ms: 0 },
            memory: MemoryConfig::default(),
            assistant: AssistantConfig {
                name: "Healthy Diet Assistant".to_string(),
                user_name: "User".to_string(),
            },
            catalog: CatalogConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parlor.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(sessions) = patch.sessions {
            if let Some(max_sessions) = sessions.max_sessions {
                self.sessions.max_sessions = max_sessions;
            }
            if let Some(idle_ttl_secs) = sessions.idle_ttl_secs {
                self.sessions.idle_ttl_secs = idle_ttl_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(max_attempts) = routing.max_attempts {
                self.routing.max_attempts = max_attempts;
            }
            if let Some(temperature) = routing.temperature {
                self.routing.temperature = temperature;
            }
            if let Some(backoff_ms) = routing.backoff_ms {
                self.routing.backoff_ms = backoff_ms;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(window_size) = memory.window_size {
                self.memory.window_size = Some(window_size);
            }
        }

        if let Some(assistant) = patch.assistant {
            if let Some(name) = assistant.name {
                self.assistant.name = name;
            }
            if let Some(user_name) = assistant.user_name {
                self.assistant.user_name = user_name;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(agents_path) = catalog.agents_path {
                self.catalog.agents_path = Some(agents_path);
            }
            if let Some(persona_path) = catalog.persona_path {
                self.catalog.persona_path = Some(persona_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        // legacy variable name
        let api_key = read_env("PARLOR_LLM_API_KEY").or_else(|| read_env("OPEN_AI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLOR_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLOR_SERVER_PORT") {
            self.server.port = parse_u16("PARLOR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLOR_SESSIONS_MAX_SESSIONS") {
            self.sessions.max_sessions = parse_usize("PARLOR_SESSIONS_MAX_SESSIONS", &value)?;
        }
        if let Some(value) = read_env("PARLOR_SESSIONS_IDLE_TTL_SECS") {
            self.sessions.idle_ttl_secs = parse_u64("PARLOR_SESSIONS_IDLE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLOR_ROUTING_MAX_ATTEMPTS") {
            self.routing.max_attempts = parse_u32("PARLOR_ROUTING_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("PARLOR_ROUTING_TEMPERATURE") {
            self.routing.temperature = parse_f32("PARLOR_ROUTING_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("PARLOR_ROUTING_BACKOFF_MS") {
            self.routing.backoff_ms = parse_u64("PARLOR_ROUTING_BACKOFF_MS", &value)?;
        }

        if let Some(value) = read_env("PARLOR_MEMORY_WINDOW_SIZE") {
            self.memory.window_size = Some(parse_usize("PARLOR_MEMORY_WINDOW_SIZE", &value)?);
        }

        if let Some(value) = read_env("PARLOR_ASSISTANT_NAME") {
            self.assistant.name = value;
        }
        if let Some(value) = read_env("PARLOR_ASSISTANT_USER_NAME") {
            self.assistant.user_name = value;
        }

        if let Some(value) = read_env("PARLOR_CATALOG_AGENTS_PATH") {
            self.catalog.agents_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("PARLOR_CATALOG_PERSONA_PATH") {
            self.catalog.persona_path = Some(PathBuf::from(value));
        }

        let log_level = read_env("PARLOR_LOGGING_LEVEL").or_else(|| read_env("PARLOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLOR_LOGGING_FORMAT").or_else(|| read_env("PARLOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(assistant_name) = overrides.assistant_name {
            self.assistant.name = assistant_name;
        }
        if let Some(max_attempts) = overrides.routing_max_attempts {
            self.routing.max_attempts = max_attempts;
        }
        if let Some(window_size) = overrides.memory_window_size {
            self.memory.window_size = Some(window_size);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_sessions(&self.sessions)?;
        validate_routing(&self.routing)?;
        validate_memory(&self.memory)?;
        validate_assistant(&self.assistant)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parlor.toml"), PathBuf::from("config/parlor.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_sessions(sessions: &SessionConfig) -> Result<(), ConfigError> {
    if sessions.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "sessions.max_sessions must be greater than zero".to_string(),
        ));
    }
    if sessions.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "routing.max_attempts must be at least 1".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&routing.temperature) {
        return Err(ConfigError::Validation(
            "routing.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.window_size == Some(0) {
        return Err(ConfigError::Validation(
            "memory.window_size must be greater than zero when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_assistant(assistant: &AssistantConfig) -> Result<(), ConfigError> {
    if assistant.name.trim().is_empty() {
        return Err(ConfigError::Validation("assistant.name must not be empty".to_string()));
    }
    if assistant.user_name.trim().is_empty() {
        return Err(ConfigError::Validation("assistant.user_name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    sessions: Option<SessionPatch>,
    routing: Option<RoutingPatch>,
    memory: Option<MemoryPatch>,
    assistant: Option<AssistantPatch>,
    catalog: Option<CatalogPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    max_sessions: Option<usize>,
    idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    max_attempts: Option<u32>,
    temperature: Option<f32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    window_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantPatch {
    name: Option<String>,
    user_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    agents_path: Option<PathBuf>,
    persona_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
