use parlor_agent::client_from_config;
use parlor_core::config::{AppConfig, LoadOptions};
use parlor_core::{AgentCatalog, Persona};
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CHECKS_AFTER_CONFIG: [&str; 3] = ["llm_client", "agent_catalog", "persona"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 3 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_client(&config));
            checks.push(check_catalog(&config));
            checks.push(check_persona(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in CHECKS_AFTER_CONFIG {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match client_from_config(&config.llm) {
        Ok(_) => DoctorCheck {
            name: "llm_client",
            status: CheckStatus::Pass,
            details: format!("{} client constructed", config.llm.provider.as_str()),
        },
        Err(error) => {
            DoctorCheck { name: "llm_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_catalog(config: &AppConfig) -> DoctorCheck {
    let source = source_label(config.catalog.agents_path.as_deref());
    match AgentCatalog::load(config.catalog.agents_path.as_deref()) {
        Ok(catalog) => DoctorCheck {
            name: "agent_catalog",
            status: CheckStatus::Pass,
            details: format!(
                "{} agents loaded from {source}: {}",
                catalog.agent_kinds().len(),
                catalog.agent_names().join(", ")
            ),
        },
        Err(error) => DoctorCheck {
            name: "agent_catalog",
            status: CheckStatus::Fail,
            details: format!("{source}: {error}"),
        },
    }
}

fn check_persona(config: &AppConfig) -> DoctorCheck {
    let source = source_label(config.catalog.persona_path.as_deref());
    match Persona::load(config.catalog.persona_path.as_deref()) {
        Ok(_) => DoctorCheck {
            name: "persona",
            status: CheckStatus::Pass,
            details: format!("persona loaded from {source}"),
        },
        Err(error) => DoctorCheck {
            name: "persona",
            status: CheckStatus::Fail,
            details: format!("{source}: {error}"),
        },
    }
}

fn source_label(path: Option<&std::path::Path>) -> String {
    path.map(|path| format!("`{}`", path.display())).unwrap_or_else(|| "embedded default".to_string())
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
