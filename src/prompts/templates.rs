use minijinja::Environment;
use rust_embed::RustEmbed;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, Text2SqlError};

#[derive(RustEmbed)]
#[folder = "prompts/"]
struct PromptAssets;

/// Jinja environment holding every embedded prompt template, keyed by file stem.
pub struct PromptTemplates {
    env: Environment<'static>,
}

impl PromptTemplates {
    pub fn load() -> Result<Self> {
        let mut env = Environment::new();
        let mut loaded = 0usize;

        for path in PromptAssets::iter() {
            let file = PromptAssets::get(&path)
                .ok_or_else(|| Text2SqlError::Template(format!("missing asset {}", path)))?;
            let source = String::from_utf8(file.data.into_owned()).map_err(|e| {
                Text2SqlError::Template(format!("{} is not valid UTF-8: {}", path, e))
            })?;
            let name = path.trim_end_matches(".txt").to_string();
            env.add_template_owned(name, source)?;
            loaded += 1;
        }

        debug!("Loaded {} prompt templates", loaded);
        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(context)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn test_all_strategy_templates_embedded() {
        let templates = PromptTemplates::load().unwrap();
        for name in [
            "basic",
            "text",
            "openai",
            "code",
            "alpaca_sft",
            "full_information",
            "sql_only",
            "dail_sql",
            "semantic_full_information",
            "icl_xiyan",
            "candidate_selection",
            "refine",
        ] {
            assert!(templates.contains(name), "missing template {}", name);
        }
    }

    #[test]
    fn test_render_has_no_html_escaping() {
        let templates = PromptTemplates::load().unwrap();
        let out = templates
            .render(
                "basic",
                context! { schema => "Table t, columns = [ a ]", question => "a < 3 & \"b\"" },
            )
            .unwrap();
        assert_eq!(out, "Table t, columns = [ a ]\nQ: a < 3 & \"b\"\nA: SELECT");
    }
}
