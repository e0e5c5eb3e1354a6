use std::env;
use std::fmt;
use std::time::Duration;

use mvpchat_contracts::history::DEFAULT_MAX_EXCHANGES;
use mvpchat_contracts::models::{Capability, ModelRef, ModelRoster};
use mvpchat_contracts::payload::PromptStyle;
use tracing::warn;

use crate::error::ChatError;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_UPLOAD_URL: &str =
    "https://dreambooth-api-experimental.replicate.com/v1/upload/filename.png";
pub const DEFAULT_STREAM_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

pub const API_TOKEN_VARS: &[&str] = &["REPLICATE_API_KEY", "REPLICATE_API_TOKEN"];

/// How an attached image reaches the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageTransfer {
    /// Two-step upload; the model fetches the serving URL.
    #[default]
    Upload,
    /// Base64 `data:` URI inside the request.
    Inline,
}

impl ImageTransfer {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upload" => Some(Self::Upload),
            "inline" | "data" | "data_uri" => Some(Self::Inline),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub api_token: Option<String>,
    pub api_base: String,
    pub upload_url: String,
    pub models: ModelRoster,
    pub prompt_style: PromptStyle,
    pub stream_delay: Duration,
    pub history_max_exchanges: usize,
    pub image_transfer: ImageTransfer,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("upload_url", &self.upload_url)
            .field("models", &self.models)
            .field("prompt_style", &self.prompt_style)
            .field("stream_delay", &self.stream_delay)
            .field("history_max_exchanges", &self.history_max_exchanges)
            .field("image_transfer", &self.image_transfer)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            models: ModelRoster::defaults(),
            prompt_style: PromptStyle::default(),
            stream_delay: DEFAULT_STREAM_DELAY,
            history_max_exchanges: DEFAULT_MAX_EXCHANGES,
            image_transfer: ImageTransfer::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut settings = Self::default();

        settings.api_token = API_TOKEN_VARS.iter().find_map(|key| get(*key));
        if let Some(base) = get("REPLICATE_API_BASE") {
            settings.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("REPLICATE_UPLOAD_URL") {
            settings.upload_url = url;
        }

        let generic = model_from_vars(&get, "REPLICATE_MODEL", "REPLICATE_MODEL_VERSION")?;
        let text = model_from_vars(&get, "REPLICATE_TEXT_MODEL", "REPLICATE_TEXT_MODEL_VERSION")?
            .or_else(|| generic.clone());
        let vision =
            model_from_vars(&get, "REPLICATE_VISION_MODEL", "REPLICATE_VISION_MODEL_VERSION")?
                .or(generic);
        let image =
            model_from_vars(&get, "REPLICATE_IMAGE_MODEL", "REPLICATE_IMAGE_MODEL_VERSION")?;
        if let Some(model) = text {
            settings.models.insert(Capability::Text, model);
        }
        if let Some(model) = vision {
            settings.models.insert(Capability::Vision, model);
        }
        if let Some(model) = image {
            settings.models.insert(Capability::Image, model);
        }

        if let Some(raw) = get("MVPCHAT_PROMPT_STYLE") {
            settings.prompt_style = PromptStyle::parse(&raw).ok_or_else(|| {
                ChatError::Configuration(format!(
                    "MVPCHAT_PROMPT_STYLE must be 'preamble' or 'raw', got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = get("MVPCHAT_IMAGE_TRANSFER") {
            settings.image_transfer = ImageTransfer::parse(&raw).ok_or_else(|| {
                ChatError::Configuration(format!(
                    "MVPCHAT_IMAGE_TRANSFER must be 'upload' or 'inline', got '{raw}'"
                ))
            })?;
        }
        if let Some(ms) = parse_number::<u64>(&get, "MVPCHAT_STREAM_DELAY_MS")? {
            settings.stream_delay = Duration::from_millis(ms);
        }
        if let Some(max) = parse_number::<usize>(&get, "MVPCHAT_HISTORY_MAX_EXCHANGES")? {
            settings.history_max_exchanges = max;
        }
        if let Some(secs) = parse_seconds(&get, "REPLICATE_POLL_INTERVAL")? {
            settings.poll_interval = Duration::from_secs_f64(secs.clamp(0.2, 5.0));
        }
        if let Some(secs) = parse_seconds(&get, "REPLICATE_POLL_TIMEOUT")? {
            settings.poll_timeout = Duration::from_secs_f64(secs.clamp(10.0, 600.0));
        }

        Ok(settings)
    }

    pub fn require_token(&self) -> Result<&str, ChatError> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ChatError::Configuration("REPLICATE_API_KEY not set".to_string()))
    }
}

fn model_from_vars(
    get: &impl Fn(&str) -> Option<String>,
    model_key: &str,
    version_key: &str,
) -> Result<Option<ModelRef>, ChatError> {
    let version = get(version_key);
    let Some(raw) = get(model_key) else {
        if version.is_some() {
            warn!("{version_key} is set without {model_key}; ignoring it");
        }
        return Ok(None);
    };
    let model = ModelRef::parse(&raw)
        .map_err(|err| ChatError::Configuration(format!("{model_key}: {err}")))?;
    Ok(Some(model.with_default_version(version.as_deref())))
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ChatError> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ChatError::Configuration(format!("{key} must be a number, got '{raw}'")))
}

/// Finite seconds only; `Duration::from_secs_f64` panics on NaN.
fn parse_seconds(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<f64>, ChatError> {
    match parse_number::<f64>(get, key)? {
        Some(secs) if !secs.is_finite() => Err(ChatError::Configuration(format!(
            "{key} must be a number, got '{secs}'"
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use mvpchat_contracts::models::Capability;
    use mvpchat_contracts::payload::PromptStyle;

    use super::{ImageTransfer, Settings, DEFAULT_API_BASE, DEFAULT_UPLOAD_URL};

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, super::ChatError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    fn model_for(settings: &Settings, capability: Capability) -> Option<String> {
        settings.models.get(capability).map(ToString::to_string)
    }

    #[test]
    fn empty_environment_uses_defaults_without_token() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.api_token, None);
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
        assert_eq!(settings.upload_url, DEFAULT_UPLOAD_URL);
        assert_eq!(settings.stream_delay, Duration::from_millis(100));
        assert_eq!(settings.prompt_style, PromptStyle::Preamble);
        assert_eq!(settings.image_transfer, ImageTransfer::Upload);
        assert!(settings.require_token().unwrap_err().is_configuration());
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let settings = settings_from(&[("REPLICATE_API_KEY", "   ")]).unwrap();
        assert!(settings.require_token().is_err());
    }

    #[test]
    fn token_accepts_either_variable_name() {
        let key = settings_from(&[("REPLICATE_API_KEY", "k1")]).unwrap();
        assert_eq!(key.require_token().unwrap(), "k1");
        let token = settings_from(&[("REPLICATE_API_TOKEN", "k2")]).unwrap();
        assert_eq!(token.require_token().unwrap(), "k2");
    }

    #[test]
    fn generic_model_pair_serves_text_and_vision() {
        let settings = settings_from(&[
            ("REPLICATE_MODEL", "yorickvp/llava-13b"),
            ("REPLICATE_MODEL_VERSION", "abc123"),
        ])
        .unwrap();
        assert_eq!(
            model_for(&settings, Capability::Text).as_deref(),
            Some("yorickvp/llava-13b:abc123")
        );
        assert_eq!(
            model_for(&settings, Capability::Vision).as_deref(),
            Some("yorickvp/llava-13b:abc123")
        );
        assert_eq!(
            model_for(&settings, Capability::Image).as_deref(),
            Some("stability-ai/sdxl")
        );
    }

    #[test]
    fn split_model_names_win_over_generic_pair() {
        let settings = settings_from(&[
            ("REPLICATE_MODEL", "a/generic"),
            ("REPLICATE_TEXT_MODEL", "meta/llama-2-70b-chat"),
            ("REPLICATE_TEXT_MODEL_VERSION", "t1"),
            ("REPLICATE_IMAGE_MODEL", "stability-ai/sdxl:i1"),
            ("REPLICATE_IMAGE_MODEL_VERSION", "ignored"),
        ])
        .unwrap();
        assert_eq!(
            model_for(&settings, Capability::Text).as_deref(),
            Some("meta/llama-2-70b-chat:t1")
        );
        assert_eq!(
            model_for(&settings, Capability::Vision).as_deref(),
            Some("a/generic")
        );
        assert_eq!(
            model_for(&settings, Capability::Image).as_deref(),
            Some("stability-ai/sdxl:i1")
        );
    }

    #[test]
    fn malformed_model_is_a_configuration_error() {
        let err = settings_from(&[("REPLICATE_TEXT_MODEL", "llava")]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("REPLICATE_TEXT_MODEL"));
    }

    #[test]
    fn tuning_variables_are_parsed() {
        let settings = settings_from(&[
            ("REPLICATE_API_BASE", "http://localhost:9000/v1/"),
            ("MVPCHAT_PROMPT_STYLE", "raw"),
            ("MVPCHAT_IMAGE_TRANSFER", "inline"),
            ("MVPCHAT_STREAM_DELAY_MS", "0"),
            ("MVPCHAT_HISTORY_MAX_EXCHANGES", "5"),
            ("REPLICATE_POLL_INTERVAL", "0.01"),
            ("REPLICATE_POLL_TIMEOUT", "30"),
        ])
        .unwrap();
        assert_eq!(settings.api_base, "http://localhost:9000/v1");
        assert_eq!(settings.prompt_style, PromptStyle::Raw);
        assert_eq!(settings.image_transfer, ImageTransfer::Inline);
        assert_eq!(settings.stream_delay, Duration::ZERO);
        assert_eq!(settings.history_max_exchanges, 5);
        assert_eq!(settings.poll_interval, Duration::from_secs_f64(0.2));
        assert_eq!(settings.poll_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_tuning_values_are_rejected() {
        assert!(settings_from(&[("MVPCHAT_STREAM_DELAY_MS", "fast")]).is_err());
        assert!(settings_from(&[("MVPCHAT_PROMPT_STYLE", "loud")]).is_err());
        assert!(settings_from(&[("MVPCHAT_IMAGE_TRANSFER", "ftp")]).is_err());
        for raw in ["NaN", "inf", "-infinity"] {
            let err = settings_from(&[("REPLICATE_POLL_INTERVAL", raw)]).unwrap_err();
            assert!(err.is_configuration(), "{raw}: {err}");
            let err = settings_from(&[("REPLICATE_POLL_TIMEOUT", raw)]).unwrap_err();
            assert!(err.to_string().contains("REPLICATE_POLL_TIMEOUT"), "{raw}: {err}");
        }
    }

    #[test]
    fn poll_tuning_is_clamped() {
        let settings = settings_from(&[
            ("REPLICATE_POLL_INTERVAL", "0.01"),
            ("REPLICATE_POLL_TIMEOUT", "9000"),
        ])
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(200));
        assert_eq!(settings.poll_timeout, Duration::from_secs(600));
    }

    #[test]
    fn debug_output_redacts_token() {
        let settings = settings_from(&[("REPLICATE_API_KEY", "secret-value")]).unwrap();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
