//! The generative capability behind the pipeline: classify page text,
//! synthesize page markup.
//!
//! The orchestrator only sees [`TableAnalyzer`], so any provider (or a
//! deterministic test double) can stand behind it. [`GenerativeAnalyzer`] is
//! the production implementation, built from a [`GenerativeModel`] plus the
//! prompts and retry policy in [`PipelineConfig`].

use crate::config::PipelineConfig;
use crate::error::{ClassifyError, PipelineError, SynthesisError};
use crate::output::ClassificationResult;
use crate::pipeline::classify::TableClassifier;
use crate::pipeline::llm::{GeminiModel, GenerativeModel, LlmProviderModel};
use crate::pipeline::synthesize::MarkupSynthesizer;
use crate::prompts::{DEFAULT_MARKUP_PROMPT, DEFAULT_TABLE_DETECTION_PROMPT};
use async_trait::async_trait;
use edgequake_llm::ProviderFactory;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Classification and markup synthesis for one page.
#[async_trait]
pub trait TableAnalyzer: Send + Sync {
    /// Decide whether `page_text` contains a table. Never called with empty
    /// text; see [`crate::pipeline::classify::classify_page`].
    async fn classify(&self, page_text: &str) -> Result<ClassificationResult, ClassifyError>;

    /// Produce cleaned HTML for the page shown in `image`. `Ok(None)` means
    /// the model answered but nothing usable was left after cleanup.
    async fn synthesize(
        &self,
        image: &Path,
        ocr_text: &str,
    ) -> Result<Option<String>, SynthesisError>;
}

/// [`TableAnalyzer`] backed by a generative model.
pub struct GenerativeAnalyzer {
    classifier: TableClassifier,
    synthesizer: MarkupSynthesizer,
}

impl GenerativeAnalyzer {
    /// Build from an explicit model, taking prompts and tuning from `config`.
    pub fn new(model: Arc<dyn GenerativeModel>, config: &PipelineConfig) -> Self {
        let classification_template = config
            .classification_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_TABLE_DETECTION_PROMPT.to_string());
        let markup_template = config
            .markup_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_MARKUP_PROMPT.to_string());

        Self {
            classifier: TableClassifier::new(
                Arc::clone(&model),
                classification_template,
                config.retry,
                config.temperature,
            ),
            synthesizer: MarkupSynthesizer::new(
                model,
                markup_template,
                config.temperature,
                config.max_tokens,
            ),
        }
    }

    /// Resolve the backend named by `config` and build the analyzer.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let model = resolve_model(config)?;
        Ok(Self::new(model, config))
    }
}

#[async_trait]
impl TableAnalyzer for GenerativeAnalyzer {
    async fn classify(&self, page_text: &str) -> Result<ClassificationResult, ClassifyError> {
        self.classifier.classify(page_text).await
    }

    async fn synthesize(
        &self,
        image: &Path,
        ocr_text: &str,
    ) -> Result<Option<String>, SynthesisError> {
        self.synthesizer.synthesize(image, ocr_text).await
    }
}

/// Resolve the generative backend, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name` other than `gemini`),
///    created through `ProviderFactory`, which reads that provider's own
///    API key variable. Requires `config.model`.
/// 3. **Gemini REST** with `config.api_key`.
///
/// Missing credentials fail here, before any page is dispatched.
pub fn resolve_model(config: &PipelineConfig) -> Result<Arc<dyn GenerativeModel>, PipelineError> {
    if let Some(ref provider) = config.provider {
        let label = config
            .model
            .clone()
            .unwrap_or_else(|| "custom-provider".to_string());
        return Ok(Arc::new(LlmProviderModel::new(Arc::clone(provider), label)));
    }

    if let Some(ref name) = config.provider_name {
        if !name.eq_ignore_ascii_case("gemini") {
            let model = config.model.as_deref().ok_or_else(|| {
                PipelineError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("Provider '{name}' needs an explicit model (--model)."),
                }
            })?;
            let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
                PipelineError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("{e}"),
                }
            })?;
            info!(provider = %name, model, "using chat provider");
            return Ok(Arc::new(LlmProviderModel::new(
                provider,
                format!("{name}/{model}"),
            )));
        }
    }

    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| PipelineError::ProviderNotConfigured {
            provider: "gemini".to_string(),
            hint: "Set GEMINI_API_KEY or pass --api-key.".to_string(),
        })?;

    let model = GeminiModel::new(
        api_key,
        config.model_or_default(),
        config.api_base_url.clone(),
        config.api_timeout_secs,
    )
    .map_err(|e| PipelineError::ProviderNotConfigured {
        provider: "gemini".to_string(),
        hint: e.to_string(),
    })?;
    info!(model = config.model_or_default(), "using Gemini REST backend");
    Ok(Arc::new(model))
}
