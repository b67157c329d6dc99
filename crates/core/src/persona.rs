use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const EMBEDDED_PERSONA: &str = include_str!("../../../config/persona.json");

/// Static voice injected into chains that use the persona block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Persona {
    pub description: String,
    pub attributes: String,
}

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("could not read persona file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse persona definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("persona attributes must be a JSON object")]
    AttributesNotObject,
}

#[derive(Debug, Deserialize)]
struct PersonaDocument {
    description: String,
    attributes: serde_json::Value,
}

impl Persona {
    pub fn embedded() -> Result<Self, PersonaError> {
        Self::from_json(EMBEDDED_PERSONA)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, PersonaError> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| PersonaError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_json(&raw)
            }
            None => Self::embedded(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PersonaError> {
        let document: PersonaDocument = serde_json::from_str(raw)?;
        if !document.attributes.is_object() {
            return Err(PersonaError::AttributesNotObject);
        }

        Ok(Self {
            description: document.description.trim().to_string(),
            attributes: render_attributes(&document.attributes)?,
        })
    }
}

/// Pretty-printed JSON with the enclosing braces stripped, one attribute per line.
fn render_attributes(attributes: &serde_json::Value) -> Result<String, PersonaError> {
    let pretty = serde_json::to_string_pretty(attributes)?;
    let lines = pretty
        .lines()
        .filter(|line| !matches!(line.trim(), "{" | "}" | ""))
        .map(|line| line.trim_end())
        .collect::<Vec<_>>();
    Ok(lines.join("\n"))
}
