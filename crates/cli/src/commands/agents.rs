use std::sync::Arc;

use parlor_agent::Orchestrator;
use parlor_core::config::{AppConfig, LoadOptions};

use super::{build_runtime, CommandResult};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("agents", "config_validation", error.to_string(), 2)
        }
    };

    match build_runtime(&config) {
        Ok(runtime) => {
            let orchestrator = Orchestrator::new(Arc::new(runtime), config.assistant.name.clone());
            CommandResult::success("agents", orchestrator.describe())
        }
        Err(error) => CommandResult::failure("agents", "runtime_setup", error, 4),
    }
}
