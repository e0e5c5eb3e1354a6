use serde::Serialize;
use serde_json::{Map, Value};

pub const TOP_P: u32 = 1;
pub const MAX_TOKENS: u32 = 1024;
pub const TEMPERATURE: f64 = 0.5;

pub const IMAGE_WIDTH: u32 = 1024;
pub const IMAGE_HEIGHT: u32 = 1024;
pub const IMAGE_REFINER: &str = "expert_ensemble_refiner";
pub const IMAGE_INFERENCE_STEPS: u32 = 25;

pub const PROMPT_PREAMBLE: &str =
    "You are a helpful Assistant that can help me with image recognition and text generation.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Instruction preamble followed by `Prompt: <text>`.
    #[default]
    Preamble,
    /// The turn text as typed.
    Raw,
}

impl PromptStyle {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preamble" | "instruct" | "instruction" => Some(Self::Preamble),
            "raw" | "plain" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preamble => "preamble",
            Self::Raw => "raw",
        }
    }

    pub fn compose(&self, text: &str) -> String {
        match self {
            Self::Preamble => format!("{PROMPT_PREAMBLE}Prompt: {text}"),
            Self::Raw => text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub top_p: u32,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_p: TOP_P,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisionInput {
    pub image: String,
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextInput {
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageGenerationInput {
    pub width: u32,
    pub height: u32,
    pub prompt: String,
    pub refine: String,
    pub apply_watermark: bool,
    pub num_inference_steps: u32,
}

/// Model input record; the variant decides which fields the provider sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestPayload {
    Vision(VisionInput),
    Text(TextInput),
    ImageGeneration(ImageGenerationInput),
}

impl RequestPayload {
    pub fn vision(image_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::Vision(VisionInput {
            image: image_url.into(),
            prompt: prompt.into(),
            sampling: SamplingParams::default(),
        })
    }

    pub fn text(prompt: impl Into<String>, history: &[String]) -> Self {
        Self::Text(TextInput {
            prompt: prompt.into(),
            sampling: SamplingParams::default(),
            history: history.to_vec(),
        })
    }

    pub fn image_generation(prompt: impl Into<String>) -> Self {
        Self::ImageGeneration(ImageGenerationInput {
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
            prompt: prompt.into(),
            refine: IMAGE_REFINER.to_string(),
            apply_watermark: false,
            num_inference_steps: IMAGE_INFERENCE_STEPS,
        })
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Vision(input) => &input.prompt,
            Self::Text(input) => &input.prompt,
            Self::ImageGeneration(input) => &input.prompt,
        }
    }

    pub fn to_input(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PromptStyle, RequestPayload, PROMPT_PREAMBLE};

    #[test]
    fn preamble_style_prefixes_instruction_and_prompt_label() {
        let prompt = PromptStyle::Preamble.compose("Tell me a joke");
        assert!(prompt.starts_with(PROMPT_PREAMBLE));
        assert!(prompt.ends_with("\n\nPrompt: Tell me a joke"));
    }

    #[test]
    fn raw_style_passes_text_through() {
        assert_eq!(PromptStyle::Raw.compose("Tell me a joke"), "Tell me a joke");
    }

    #[test]
    fn prompt_style_parse_accepts_aliases() {
        assert_eq!(PromptStyle::parse(" RAW "), Some(PromptStyle::Raw));
        assert_eq!(PromptStyle::parse("preamble"), Some(PromptStyle::Preamble));
        assert_eq!(PromptStyle::parse("verbose"), None);
    }

    #[test]
    fn vision_payload_has_image_and_no_history() {
        let input = RequestPayload::vision("https://x/serving", "describe").to_input();
        assert_eq!(
            serde_json::Value::Object(input),
            json!({
                "image": "https://x/serving",
                "prompt": "describe",
                "top_p": 1,
                "max_tokens": 1024,
                "temperature": 0.5,
            })
        );
    }

    #[test]
    fn text_payload_carries_history_oldest_first() {
        let history = vec!["User: hi".to_string(), "Assistant:hello".to_string()];
        let input = RequestPayload::text("again", &history).to_input();
        assert_eq!(input["history"], json!(["User: hi", "Assistant:hello"]));
        assert_eq!(input["top_p"], json!(1));
        assert_eq!(input["max_tokens"], json!(1024));
        assert_eq!(input["temperature"], json!(0.5));
        assert!(input.get("image").is_none());
    }

    #[test]
    fn image_generation_payload_uses_fixed_render_settings() {
        let payload = RequestPayload::image_generation("Generate image of a fox");
        assert_eq!(payload.prompt(), "Generate image of a fox");
        assert_eq!(
            serde_json::Value::Object(payload.to_input()),
            json!({
                "width": 1024,
                "height": 1024,
                "prompt": "Generate image of a fox",
                "refine": "expert_ensemble_refiner",
                "apply_watermark": false,
                "num_inference_steps": 25,
            })
        );
    }
}
