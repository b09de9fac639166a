//! Markup synthesizer: page image + OCR text → self-contained HTML replica.
//!
//! One model call, no retry. The image is re-encoded as RGB PNG and sent
//! together with the markup prompt. The reply goes through
//! [`postprocess::clean_markup`]; markup that is empty after cleaning is
//! reported as `Ok(None)` rather than an error.

use crate::error::SynthesisError;
use crate::pipeline::encode;
use crate::pipeline::llm::{FinishReason, Generation, GenerationRequest, GenerativeModel};
use crate::pipeline::postprocess;
use crate::prompts;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Prompt + model for markup generation.
pub struct MarkupSynthesizer {
    model: Arc<dyn GenerativeModel>,
    template: String,
    temperature: f32,
    max_tokens: usize,
}

impl MarkupSynthesizer {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        template: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            model,
            template: template.into(),
            temperature,
            max_tokens,
        }
    }

    /// Generate cleaned markup for the page rendered in `image`.
    pub async fn synthesize(
        &self,
        image: &Path,
        ocr_text: &str,
    ) -> Result<Option<String>, SynthesisError> {
        let path = image.to_path_buf();
        let payload = tokio::task::spawn_blocking(move || encode::encode_file(&path))
            .await
            .map_err(|e| SynthesisError::Image {
                path: image.to_path_buf(),
                detail: format!("encode task panicked: {e}"),
            })?
            .map_err(|e| SynthesisError::Image {
                path: image.to_path_buf(),
                detail: e.to_string(),
            })?;

        let image_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.png".to_string());
        let prompt = prompts::markup_prompt(&self.template, &image_name, ocr_text)
            .map_err(SynthesisError::Prompt)?;

        info!(
            image = %image_name,
            width = payload.width,
            height = payload.height,
            prompt_chars = prompt.len(),
            "requesting page markup"
        );

        let request = GenerationRequest {
            prompt,
            image: Some(payload),
            json_mode: false,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };

        let raw = match self.model.generate(&request).await? {
            Generation {
                text: Some(text), ..
            } if !text.is_empty() => text,
            Generation {
                finish_reason: FinishReason::Other(reason),
                ..
            } => {
                warn!(image = %image_name, %reason, "markup response empty or blocked");
                return Err(SynthesisError::Blocked { reason });
            }
            _ => return Err(SynthesisError::Empty),
        };

        let markup = postprocess::clean_markup(&raw);
        if markup.is_empty() {
            warn!(image = %image_name, "markup empty after cleanup");
            return Ok(None);
        }
        info!(image = %image_name, chars = markup.len(), "markup generated");
        Ok(Some(markup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneShot {
        reply: Result<Generation, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerativeModel for OneShot {
        async fn generate(&self, r: &GenerationRequest) -> Result<Generation, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(r.image.is_some());
            assert!(r.prompt.contains("the provided image (page_2.png)"));
            self.reply.clone().map_err(GenerationError::Transport)
        }
        fn model_name(&self) -> &str {
            "one-shot"
        }
    }

    fn synth(reply: Result<Generation, String>) -> (MarkupSynthesizer, Arc<OneShot>) {
        let model = Arc::new(OneShot {
            reply,
            calls: AtomicUsize::new(0),
        });
        let s = MarkupSynthesizer::new(model.clone(), prompts::DEFAULT_MARKUP_PROMPT, 0.1, 1024);
        (s, model)
    }

    fn page_image(dir: &Path) -> PathBuf {
        let path = dir.join("page_2.png");
        RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn fenced_reply_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let (s, _) = synth(Ok(Generation::text("```html\n<html>...</html>\n```")));
        let markup = s.synthesize(&page_image(dir.path()), "text").await.unwrap();
        assert_eq!(markup.as_deref(), Some("<html>...</html>"));
    }

    #[tokio::test]
    async fn blocked_reply_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (s, model) = synth(Ok(Generation::blocked("SAFETY")));
        let err = s.synthesize(&page_image(dir.path()), "t").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Blocked { .. }), "got: {err}");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_stop_is_empty_error() {
        let dir = tempfile::tempdir().unwrap();
        let (s, _) = synth(Ok(Generation::empty_stop()));
        let err = s.synthesize(&page_image(dir.path()), "t").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Empty));
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (s, model) = synth(Err("timeout".into()));
        let err = s.synthesize(&page_image(dir.path()), "t").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Generation(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_after_cleanup_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (s, _) = synth(Ok(Generation::text("```html\n```")));
        assert_eq!(s.synthesize(&page_image(dir.path()), "t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_image_fails_before_calling_model() {
        let dir = tempfile::tempdir().unwrap();
        let (s, model) = synth(Ok(Generation::text("<p/>")));
        let err = s
            .synthesize(&dir.path().join("page_2.png"), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Image { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
