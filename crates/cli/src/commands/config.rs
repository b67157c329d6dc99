use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parlor_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let optional_path = |path: Option<&PathBuf>| {
        path.map(|path| path.display().to_string()).unwrap_or_else(|| "<embedded>".to_string())
    };

    vec![
        Field {
            key: "llm.provider",
            env_keys: &["PARLOR_LLM_PROVIDER"],
            value: config.llm.provider.as_str().to_string(),
        },
        Field {
            key: "llm.api_key",
            env_keys: &["PARLOR_LLM_API_KEY", "OPEN_AI_API_KEY"],
            value: if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
        },
        Field {
            key: "llm.base_url",
            env_keys: &["PARLOR_LLM_BASE_URL"],
            value: config.llm.base_url.clone().unwrap_or_else(|| "<provider default>".to_string()),
        },
        Field {
            key: "llm.timeout_secs",
            env_keys: &["PARLOR_LLM_TIMEOUT_SECS"],
            value: config.llm.timeout_secs.to_string(),
        },
        Field {
            key: "server.bind_address",
            env_keys: &["PARLOR_SERVER_BIND_ADDRESS"],
            value: config.server.bind_address.clone(),
        },
        Field {
            key: "server.port",
            env_keys: &["PARLOR_SERVER_PORT"],
            value: config.server.port.to_string(),
        },
        Field {
            key: "server.graceful_shutdown_secs",
            env_keys: &["PARLOR_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: config.server.graceful_shutdown_secs.to_string(),
        },
        Field {
            key: "sessions.max_sessions",
            env_keys: &["PARLOR_SESSIONS_MAX_SESSIONS"],
            value: config.sessions.max_sessions.to_string(),
        },
        Field {
            key: "sessions.idle_ttl_secs",
            env_keys: &["PARLOR_SESSIONS_IDLE_TTL_SECS"],
            value: config.sessions.idle_ttl_secs.to_string(),
        },
        Field {
            key: "routing.max_attempts",
            env_keys: &["PARLOR_ROUTING_MAX_ATTEMPTS"],
            value: config.routing.max_attempts.to_string(),
        },
        Field {
            key: "routing.temperature",
            env_keys: &["PARLOR_ROUTING_TEMPERATURE"],
            value: config.routing.temperature.to_string(),
        },
        Field {
            key: "routing.backoff_ms",
            env_keys: &["PARLOR_ROUTING_BACKOFF_MS"],
            value: config.routing.backoff_ms.to_string(),
        },
        Field {
            key: "memory.window_size",
            env_keys: &["PARLOR_MEMORY_WINDOW_SIZE"],
            value: config
                .memory
                .window_size
                .map(|size| size.to_string())
                .unwrap_or_else(|| "<unbounded>".to_string()),
        },
        Field {
            key: "assistant.name",
            env_keys: &["PARLOR_ASSISTANT_NAME"],
            value: config.assistant.name.clone(),
        },
        Field {
            key: "assistant.user_name",
            env_keys: &["PARLOR_ASSISTANT_USER_NAME"],
            value: config.assistant.user_name.clone(),
        },
        Field {
            key: "catalog.agents_path",
            env_keys: &["PARLOR_CATALOG_AGENTS_PATH"],
            value: optional_path(config.catalog.agents_path.as_ref()),
        },
        Field {
            key: "catalog.persona_path",
            env_keys: &["PARLOR_CATALOG_PERSONA_PATH"],
            value: optional_path(config.catalog.persona_path.as_ref()),
        },
        Field {
            key: "logging.level",
            env_keys: &["PARLOR_LOGGING_LEVEL", "PARLOR_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key: "logging.format",
            env_keys: &["PARLOR_LOGGING_FORMAT", "PARLOR_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_lowercase(),
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("parlor.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/parlor.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
