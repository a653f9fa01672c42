//! Model task taxonomy.
//!
//! The task defines the model topology used for the export. Caller-facing
//! names are normalized through an alias table before validation.

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};

/// Task defining the exported model topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    FeatureExtraction,
    TextGeneration,
    TextGenerationWithPast,
    TextClassification,
    TokenClassification,
    QuestionAnswering,
    FillMask,
    ImageClassification,
    Text2textGeneration,
    ImageToText,
}

impl Task {
    /// Parse a task label, normalizing legacy aliases.
    pub fn parse(name: &str) -> Result<Self> {
        let task = match name {
            "feature-extraction" | "default" => Task::FeatureExtraction,
            "text-generation" | "causal-lm" => Task::TextGeneration,
            "text-generation-with-past" | "causal-lm-with-past" => Task::TextGenerationWithPast,
            "text-classification" | "sequence-classification" => Task::TextClassification,
            "token-classification" => Task::TokenClassification,
            "question-answering" => Task::QuestionAnswering,
            "fill-mask" | "masked-lm" => Task::FillMask,
            "image-classification" => Task::ImageClassification,
            "text2text-generation" | "seq2seq-lm" | "translation" | "summarization" => {
                Task::Text2textGeneration
            }
            "image-to-text" => Task::ImageToText,
            other => {
                return Err(CuantizarError::ConfigValue {
                    field: "task".into(),
                    message: format!("unknown task '{other}'"),
                    suggestion: "Use a task label such as \"text-generation\" or \"text-classification\"".into(),
                })
            }
        };
        Ok(task)
    }

    /// Canonical task label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::FeatureExtraction => "feature-extraction",
            Task::TextGeneration => "text-generation",
            Task::TextGenerationWithPast => "text-generation-with-past",
            Task::TextClassification => "text-classification",
            Task::TokenClassification => "token-classification",
            Task::QuestionAnswering => "question-answering",
            Task::FillMask => "fill-mask",
            Task::ImageClassification => "image-classification",
            Task::Text2textGeneration => "text2text-generation",
            Task::ImageToText => "image-to-text",
        }
    }

    /// Whether this is an autoregressive generation task.
    pub fn is_generative(&self) -> bool {
        matches!(self, Task::TextGeneration | Task::TextGenerationWithPast)
    }

    /// Whether the stateful-decoder export optimization applies.
    pub fn supports_stateful(&self) -> bool {
        self.is_generative()
    }

    /// The cache-using variant of a generation task.
    pub fn with_past(self) -> Self {
        match self {
            Task::TextGeneration => Task::TextGenerationWithPast,
            other => other,
        }
    }

    /// Reject tasks this quantization path does not support.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            Task::Text2textGeneration => {
                Err(CuantizarError::UnsupportedTask { task: "Seq2Seq".into() })
            }
            Task::ImageToText => Err(CuantizarError::UnsupportedTask { task: "Image2Text".into() }),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_names() {
        assert_eq!(Task::parse("text-generation").unwrap(), Task::TextGeneration);
        assert_eq!(Task::parse("text-classification").unwrap(), Task::TextClassification);
        assert_eq!(Task::parse("feature-extraction").unwrap(), Task::FeatureExtraction);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Task::parse("causal-lm").unwrap(), Task::TextGeneration);
        assert_eq!(Task::parse("sequence-classification").unwrap(), Task::TextClassification);
        assert_eq!(Task::parse("masked-lm").unwrap(), Task::FillMask);
        assert_eq!(Task::parse("default").unwrap(), Task::FeatureExtraction);
        assert_eq!(Task::parse("seq2seq-lm").unwrap(), Task::Text2textGeneration);
    }

    #[test]
    fn test_parse_unknown_is_config_error() {
        assert!(Task::parse("interpretive-dance").is_err());
    }

    #[test]
    fn test_seq2seq_and_image_to_text_rejected() {
        assert!(Task::Text2textGeneration.ensure_supported().is_err());
        assert!(Task::ImageToText.ensure_supported().is_err());
        assert!(Task::TextGeneration.ensure_supported().is_ok());
        assert!(Task::TextClassification.ensure_supported().is_ok());
    }

    #[test]
    fn test_with_past_only_affects_generation() {
        assert_eq!(Task::TextGeneration.with_past(), Task::TextGenerationWithPast);
        assert_eq!(Task::TextClassification.with_past(), Task::TextClassification);
    }

    #[test]
    fn test_stateful_support() {
        assert!(Task::TextGeneration.supports_stateful());
        assert!(Task::TextGenerationWithPast.supports_stateful());
        assert!(!Task::QuestionAnswering.supports_stateful());
    }

    #[test]
    fn test_display_round_trips() {
        for task in [Task::TextGeneration, Task::FillMask, Task::ImageClassification] {
            assert_eq!(Task::parse(task.as_str()).unwrap(), task);
        }
    }
}
