use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use mvpchat_contracts::chat::Attachment;
use mvpchat_contracts::models::ModelRef;
use mvpchat_contracts::payload::RequestPayload;
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::error::ChatError;
use crate::replicate::ReplicateClient;

/// Text fragments in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

pub const PROVIDER_NAMES: &[&str] = &["replicate", "dryrun"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub url: String,
    pub sha256: String,
    pub bytes: usize,
}

/// The authenticated client handle a session talks to.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Makes a local image fetchable by the provider.
    async fn resolve_image(&self, attachment: &Attachment) -> Result<ResolvedImage, ChatError>;

    async fn stream_text(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<FragmentStream, ChatError>;

    async fn generate_images(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<Vec<String>, ChatError>;
}

pub fn connect(name: &str, settings: &Settings) -> Result<Arc<dyn InferenceProvider>, ChatError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "replicate" => Ok(Arc::new(ReplicateClient::new(settings)?)),
        "dryrun" => Ok(Arc::new(DryrunProvider)),
        other => Err(ChatError::Configuration(format!(
            "unknown provider '{other}' (expected one of: {})",
            PROVIDER_NAMES.join(", ")
        ))),
    }
}

pub(crate) async fn read_attachment(path: &Path) -> Result<Vec<u8>, ChatError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ChatError::Attachment {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Offline provider: echoes the user's prompt back word by word.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

impl DryrunProvider {
    fn echo_source(prompt: &str) -> &str {
        prompt
            .rsplit_once("Prompt: ")
            .map(|(_, tail)| tail)
            .unwrap_or(prompt)
    }
}

#[async_trait]
impl InferenceProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn resolve_image(&self, attachment: &Attachment) -> Result<ResolvedImage, ChatError> {
        let bytes = read_attachment(&attachment.path).await?;
        let absolute = tokio::fs::canonicalize(&attachment.path)
            .await
            .unwrap_or_else(|_| attachment.path.clone());
        Ok(ResolvedImage {
            url: format!("file://{}", absolute.display()),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len(),
        })
    }

    async fn stream_text(
        &self,
        _model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<FragmentStream, ChatError> {
        let text = format!("(dryrun) {}", Self::echo_source(payload.prompt()));
        let fragments: Vec<Result<String, ChatError>> = text
            .split_inclusive(' ')
            .map(|part| Ok(part.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }

    async fn generate_images(
        &self,
        _model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<Vec<String>, ChatError> {
        let digest = sha256_hex(payload.prompt().as_bytes());
        Ok(vec![format!("https://dryrun.invalid/{}.png", &digest[..16])])
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;
    use mvpchat_contracts::chat::Attachment;
    use mvpchat_contracts::models::ModelRef;
    use mvpchat_contracts::payload::{PromptStyle, RequestPayload};

    use super::{connect, DryrunProvider, InferenceProvider};
    use crate::config::Settings;

    fn model() -> ModelRef {
        ModelRef::parse("dryrun/echo").unwrap()
    }

    #[tokio::test]
    async fn dryrun_echoes_prompt_as_word_fragments() -> anyhow::Result<()> {
        let payload = RequestPayload::text(PromptStyle::Preamble.compose("hello there"), &[]);
        let fragments: Vec<String> = DryrunProvider
            .stream_text(&model(), &payload)
            .await?
            .try_collect()
            .await?;
        assert_eq!(fragments, vec!["(dryrun) ", "hello ", "there"]);
        Ok(())
    }

    #[tokio::test]
    async fn dryrun_image_url_is_stable_per_prompt() -> anyhow::Result<()> {
        let payload = RequestPayload::image_generation("generate image of a fox");
        let first = DryrunProvider.generate_images(&model(), &payload).await?;
        let second = DryrunProvider.generate_images(&model(), &payload).await?;
        assert_eq!(first, second);
        assert!(first[0].starts_with("https://dryrun.invalid/"));
        Ok(())
    }

    #[tokio::test]
    async fn dryrun_resolves_attachment_to_file_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cat.png");
        std::fs::write(&path, b"not really a png")?;
        let resolved = DryrunProvider
            .resolve_image(&Attachment::from_path(&path))
            .await?;
        assert!(resolved.url.starts_with("file://"));
        assert!(resolved.url.ends_with("cat.png"));
        assert_eq!(resolved.bytes, 16);
        assert_eq!(resolved.sha256.len(), 64);
        Ok(())
    }

    #[tokio::test]
    async fn missing_attachment_is_reported_with_path() {
        let err = DryrunProvider
            .resolve_image(&Attachment::from_path("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.png"));
    }

    #[test]
    fn connect_replicate_requires_token() {
        let err = connect("replicate", &Settings::default()).err().unwrap();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "configuration error: REPLICATE_API_KEY not set"
        );
    }

    #[test]
    fn connect_dryrun_needs_no_token() {
        let provider = connect("DryRun", &Settings::default()).unwrap();
        assert_eq!(provider.name(), "dryrun");
        assert!(connect("openai", &Settings::default()).is_err());
    }
}
