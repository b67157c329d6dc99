//! Static agent and chain catalog.
//!
//! The catalog is the read-only configuration store: which agents exist, which
//! chains each agent runs (in declared order), the prompt templates and model
//! parameters of every chain, the index table the guidance chain answers with,
//! and the greeting. It is loaded once at startup and any inconsistency is fatal.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;
use tera::{Context, Tera};
use thiserror::Error;

const EMBEDDED_CATALOG: &str = include_str!("../../../config/agents.toml");

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentKind {
    Guidance,
    Conversation,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Guidance => "GuidanceAgent",
            Self::Conversation => "ConversationAgent",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "GuidanceAgent" => Ok(Self::Guidance),
            "ConversationAgent" => Ok(Self::Conversation),
            other => Err(CatalogError::UnknownAgentKind(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChainConfig {
    #[serde(skip)]
    pub name: String,
    pub system_template: String,
    pub human_template: String,
    #[serde(rename = "input_fields")]
    pub input_field_names: Vec<String>,
    pub model_name: String,
    pub temperature: f32,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub uses_parser: bool,
    #[serde(default, rename = "uses_persona")]
    pub uses_persona_block: bool,
}

impl ChainConfig {
    pub fn system_template_name(&self) -> String {
        format!("{}/system", self.name)
    }

    pub fn human_template_name(&self) -> String {
        format!("{}/human", self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Greeting {
    pub text: String,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub openers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read catalog file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown agent kind `{0}` (expected GuidanceAgent|ConversationAgent)")]
    UnknownAgentKind(String),
    #[error("agent `{agent}` references undefined chain `{chain}`")]
    UndefinedChain { agent: String, chain: String },
    #[error("agent `{0}` is listed in agent_names but has no chain list")]
    UnconfiguredAgent(String),
    #[error("catalog validation failed: {0}")]
    Validation(String),
    #[error("template error: {0}")]
    Template(String),
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    agent_names: Vec<String>,
    #[serde(default)]
    index_aliases: BTreeMap<String, usize>,
    greeting: Greeting,
    chains: BTreeMap<String, ChainConfig>,
    agents: BTreeMap<String, AgentChains>,
}

#[derive(Debug, Deserialize)]
struct AgentChains {
    chains: Vec<String>,
}

#[derive(Debug)]
pub struct AgentCatalog {
    agent_names: Vec<String>,
    index_aliases: BTreeMap<String, usize>,
    greeting: Greeting,
    chains: BTreeMap<String, Arc<ChainConfig>>,
    agent_chains: BTreeMap<AgentKind, Vec<String>>,
    templates: Tera,
}

impl AgentCatalog {
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_toml_str(EMBEDDED_CATALOG)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| CatalogError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)
            }
            None => Self::embedded(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = toml::from_str(raw)?;

        let chains = document
            .chains
            .into_iter()
            .map(|(name, mut chain)| {
                chain.name = name.clone();
                (name, Arc::new(chain))
            })
            .collect::<BTreeMap<_, _>>();

        let mut agent_chains = BTreeMap::new();
        for (agent, declared) in document.agents {
            let kind = agent.parse::<AgentKind>()?;
            for chain in &declared.chains {
                if !chains.contains_key(chain) {
                    return Err(CatalogError::UndefinedChain {
                        agent: agent.clone(),
                        chain: chain.clone(),
                    });
                }
            }
            agent_chains.insert(kind, declared.chains);
        }

        if document.agent_names.is_empty() {
            return Err(CatalogError::Validation("agent_names must not be empty".to_string()));
        }
        for name in &document.agent_names {
            let kind = name.parse::<AgentKind>()?;
            if !agent_chains.contains_key(&kind) {
                return Err(CatalogError::UnconfiguredAgent(name.clone()));
            }
        }
        for (alias, index) in &document.index_aliases {
            if *index >= document.agent_names.len() {
                return Err(CatalogError::Validation(format!(
                    "index alias `{alias}` points past the end of agent_names"
                )));
            }
        }

        validate_guidance_chain(&agent_chains, &chains)?;
        let templates = compile_templates(&chains, &document.greeting)?;

        Ok(Self {
            agent_names: document.agent_names,
            index_aliases: document.index_aliases,
            greeting: document.greeting,
            chains,
            agent_chains,
            templates,
        })
    }

    pub fn agent_names(&self) -> &[String] {
        &self.agent_names
    }

    /// The static index→name table used when the guidance chain omits the name.
    pub fn agent_name_at(&self, index: usize) -> Option<&str> {
        self.agent_names.get(index).map(String::as_str)
    }

    /// Configured agent kinds, index table order first, each listed once.
    pub fn agent_kinds(&self) -> Vec<AgentKind> {
        let mut kinds = Vec::new();
        let listed = self.agent_names.iter().filter_map(|name| name.parse::<AgentKind>().ok());
        for kind in listed.chain(self.agent_chains.keys().copied()) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    pub fn resolve_index_alias(&self, alias: &str) -> Option<usize> {
        let alias = alias.trim();
        self.index_aliases
            .get(alias)
            .or_else(|| self.index_aliases.get(&alias.to_ascii_uppercase()))
            .copied()
    }

    pub fn chain(&self, name: &str) -> Option<&Arc<ChainConfig>> {
        self.chains.get(name)
    }

    /// Chains of an agent in declared order.
    pub fn chains_for(&self, kind: AgentKind) -> Vec<Arc<ChainConfig>> {
        self.agent_chains
            .get(&kind)
            .map(|names| names.iter().filter_map(|name| self.chains.get(name).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn templates(&self) -> &Tera {
        &self.templates
    }

    /// The opening line of a conversation. The fixed text is used unless randomized
    /// openers are switched on.
    pub fn greeting_text(&self, ai_name: &str) -> Result<String, CatalogError> {
        let mut context = Context::new();
        context.insert("ai_name", ai_name);

        let template = if self.greeting.randomize && !self.greeting.openers.is_empty() {
            opener_template_name(rand::thread_rng().gen_range(0..self.greeting.openers.len()))
        } else {
            GREETING_TEMPLATE.to_string()
        };

        self.templates
            .render(&template, &context)
            .map_err(|error| CatalogError::Template(template_error_chain(&error)))
    }
}

const GREETING_TEMPLATE: &str = "greeting/text";

fn opener_template_name(index: usize) -> String {
    format!("greeting/opener/{index}")
}

fn validate_guidance_chain(
    agent_chains: &BTreeMap<AgentKind, Vec<String>>,
    chains: &BTreeMap<String, Arc<ChainConfig>>,
) -> Result<(), CatalogError> {
    let Some(guidance) = agent_chains.get(&AgentKind::Guidance) else {
        return Err(CatalogError::Validation("GuidanceAgent must be configured".to_string()));
    };
    let [chain_name] = guidance.as_slice() else {
        return Err(CatalogError::Validation(
            "GuidanceAgent must declare exactly one chain".to_string(),
        ));
    };
    let uses_parser = chains.get(chain_name).map(|chain| chain.uses_parser).unwrap_or(false);
    if !uses_parser {
        return Err(CatalogError::Validation(format!(
            "guidance chain `{chain_name}` must set uses_parser = true"
        )));
    }
    Ok(())
}

fn compile_templates(
    chains: &BTreeMap<String, Arc<ChainConfig>>,
    greeting: &Greeting,
) -> Result<Tera, CatalogError> {
    let mut sources = Vec::new();
    for chain in chains.values() {
        sources.push((chain.system_template_name(), chain.system_template.clone()));
        sources.push((chain.human_template_name(), chain.human_template.clone()));
    }
    sources.push((GREETING_TEMPLATE.to_string(), greeting.text.clone()));
    for (index, opener) in greeting.openers.iter().enumerate() {
        sources.push((opener_template_name(index), opener.clone()));
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(sources)
        .map_err(|error| CatalogError::Template(template_error_chain(&error)))?;
    Ok(tera)
}

/// Tera nests the useful message in the error source chain.
pub fn template_error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
