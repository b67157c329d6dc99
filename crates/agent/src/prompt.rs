use std::collections::BTreeMap;
use std::sync::Arc;

use parlor_core::catalog::template_error_chain;
use parlor_core::{AgentCatalog, AgentError, ChainConfig, MissingInputError};
use tera::Context;

use crate::invoker::GuidanceResult;

pub type PromptInputs = BTreeMap<String, String>;

pub const FORMAT_INSTRUCTIONS_FIELD: &str = "format_instructions";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system_text: String,
    pub human_text: String,
}

/// Renders the system/human template pair of a chain against resolved inputs.
#[derive(Clone)]
pub struct PromptRenderer {
    catalog: Arc<AgentCatalog>,
}

impl PromptRenderer {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self { catalog }
    }

    pub fn render(
        &self,
        chain: &ChainConfig,
        inputs: &PromptInputs,
    ) -> Result<RenderedPrompt, AgentError> {
        let mut context = Context::new();
        for field in &chain.input_field_names {
            let value = inputs.get(field).ok_or_else(|| MissingInputError {
                chain: chain.name.clone(),
                field: field.clone(),
            })?;
            context.insert(field.as_str(), value);
        }
        // persona fields may be supplied without being declared as inputs
        for (field, value) in inputs {
            if !context.contains_key(field) {
                context.insert(field.as_str(), value);
            }
        }
        if chain.uses_parser {
            context.insert(FORMAT_INSTRUCTIONS_FIELD, GuidanceResult::format_instructions());
        }

        Ok(RenderedPrompt {
            system_text: self.render_one(chain, &chain.system_template_name(), &context)?,
            human_text: self.render_one(chain, &chain.human_template_name(), &context)?,
        })
    }

    fn render_one(
        &self,
        chain: &ChainConfig,
        template: &str,
        context: &Context,
    ) -> Result<String, AgentError> {
        self.catalog
            .templates()
            .render(template, context)
            .map(|text| text.trim().to_string())
            .map_err(|error| AgentError::Template {
                chain: chain.name.clone(),
                message: template_error_chain(&error),
            })
    }
}
