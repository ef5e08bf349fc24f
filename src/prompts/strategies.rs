use minijinja::context;
use std::collections::HashMap;

use super::templates::PromptTemplates;
use super::PromptType;
use crate::error::Result;
use crate::retriever::Exemplar;
use crate::schema::FormatType;

/// Everything a strategy needs once the factory has resolved exemplars and
/// rendered the schema.
pub struct PromptContext<'a> {
    pub schema: &'a str,
    pub question: &'a str,
    pub evidence: Option<&'a str>,
    pub examples: &'a [Exemplar],
}

pub trait PromptStrategy: Send + Sync {
    fn prompt_type(&self) -> PromptType;

    fn default_format(&self) -> FormatType;

    /// Whether exemplars are resolved and shown before the target question.
    fn uses_examples(&self) -> bool;

    /// Whether a caller-supplied schema format replaces the default.
    fn accepts_format_override(&self) -> bool {
        false
    }

    fn compose(&self, templates: &PromptTemplates, ctx: &PromptContext<'_>) -> Result<String>;
}

/// Schema plus question, no examples.
pub struct ZeroShotPrompt {
    prompt_type: PromptType,
    format: FormatType,
}

impl PromptStrategy for ZeroShotPrompt {
    fn prompt_type(&self) -> PromptType {
        self.prompt_type
    }

    fn default_format(&self) -> FormatType {
        self.format
    }

    fn uses_examples(&self) -> bool {
        false
    }

    fn compose(&self, templates: &PromptTemplates, ctx: &PromptContext<'_>) -> Result<String> {
        templates.render(
            self.prompt_type.as_str(),
            context! {
                schema => ctx.schema,
                question => ctx.question,
                evidence => ctx.evidence,
            },
        )
    }
}

/// Example blocks in the strategy's own layout, then the target question block.
pub struct FewShotPrompt {
    prompt_type: PromptType,
    format: FormatType,
    format_override: bool,
}

impl PromptStrategy for FewShotPrompt {
    fn prompt_type(&self) -> PromptType {
        self.prompt_type
    }

    fn default_format(&self) -> FormatType {
        self.format
    }

    fn uses_examples(&self) -> bool {
        true
    }

    fn accepts_format_override(&self) -> bool {
        self.format_override
    }

    fn compose(&self, templates: &PromptTemplates, ctx: &PromptContext<'_>) -> Result<String> {
        templates.render(
            self.prompt_type.as_str(),
            context! {
                schema => ctx.schema,
                question => ctx.question,
                evidence => ctx.evidence,
                examples => ctx.examples,
            },
        )
    }
}

fn zero_shot(prompt_type: PromptType, format: FormatType) -> Box<dyn PromptStrategy> {
    Box::new(ZeroShotPrompt {
        prompt_type,
        format,
    })
}

fn few_shot(
    prompt_type: PromptType,
    format: FormatType,
    format_override: bool,
) -> Box<dyn PromptStrategy> {
    Box::new(FewShotPrompt {
        prompt_type,
        format,
        format_override,
    })
}

pub fn registry() -> HashMap<PromptType, Box<dyn PromptStrategy>> {
    let strategies = vec![
        zero_shot(PromptType::Basic, FormatType::Basic),
        zero_shot(PromptType::TextRepresentation, FormatType::Text),
        zero_shot(PromptType::OpenAiDemo, FormatType::OpenAi),
        zero_shot(PromptType::CodeRepresentation, FormatType::Code),
        zero_shot(PromptType::AlpacaSft, FormatType::OpenAi),
        few_shot(PromptType::FullInformation, FormatType::Basic, true),
        few_shot(PromptType::SqlOnly, FormatType::Code, false),
        few_shot(PromptType::DailSql, FormatType::Code, false),
        few_shot(PromptType::SemanticFullInformation, FormatType::Semantic, true),
        few_shot(PromptType::IclXiyan, FormatType::MSchema, false),
    ];

    strategies
        .into_iter()
        .map(|strategy| (strategy.prompt_type(), strategy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_prompt_type() {
        let registry = registry();
        assert_eq!(registry.len(), PromptType::ALL.len());
        for prompt_type in PromptType::ALL {
            assert_eq!(registry[&prompt_type].prompt_type(), prompt_type);
        }
    }

    #[test]
    fn test_strategy_table() {
        let registry = registry();
        let few_shot: Vec<PromptType> = PromptType::ALL
            .into_iter()
            .filter(|t| registry[t].uses_examples())
            .collect();
        assert_eq!(
            few_shot,
            vec![
                PromptType::FullInformation,
                PromptType::SqlOnly,
                PromptType::DailSql,
                PromptType::SemanticFullInformation,
                PromptType::IclXiyan,
            ]
        );
        assert_eq!(registry[&PromptType::AlpacaSft].default_format(), FormatType::OpenAi);
        assert_eq!(registry[&PromptType::IclXiyan].default_format(), FormatType::MSchema);
        assert!(registry[&PromptType::SemanticFullInformation].accepts_format_override());
        assert!(!registry[&PromptType::DailSql].accepts_format_override());
    }

    #[test]
    fn test_openai_evidence_layout() {
        let templates = PromptTemplates::load().unwrap();
        let strategy = &registry()[&PromptType::OpenAiDemo];
        let mut ctx = PromptContext {
            schema: "# hotel ( hotelno )",
            question: "list hotels",
            evidence: None,
            examples: &[],
        };
        let plain = strategy.compose(&templates, &ctx).unwrap();
        assert!(plain.ends_with("### list hotels\n#\nSELECT"));

        ctx.evidence = Some("city is text");
        let hinted = strategy.compose(&templates, &ctx).unwrap();
        assert!(hinted.ends_with("### list hotels\n#\n#Evidence: city is text\nSELECT"));
    }
}
