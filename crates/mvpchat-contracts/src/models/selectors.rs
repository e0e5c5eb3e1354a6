use super::registry::{Capability, ModelRef, ModelRoster};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelRef,
    pub capability: Capability,
    pub fallback_reason: Option<String>,
}

impl ModelRoster {
    pub fn select(&self, capability: Capability) -> Result<ModelSelection, String> {
        if let Some(model) = self.get(capability) {
            return Ok(ModelSelection {
                model: model.clone(),
                capability,
                fallback_reason: None,
            });
        }
        for fallback in capability.fallbacks() {
            if let Some(model) = self.get(*fallback) {
                return Ok(ModelSelection {
                    model: model.clone(),
                    capability,
                    fallback_reason: Some(format!(
                        "No {capability} model configured; using {fallback} model '{model}'."
                    )),
                });
            }
        }
        Err(format!(
            "No model configured for capability '{capability}'."
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Capability, ModelRef, ModelRoster};

    fn model(raw: &str) -> ModelRef {
        ModelRef::parse(raw).unwrap()
    }

    #[test]
    fn select_returns_configured_model_without_reason() {
        let mut roster = ModelRoster::new();
        roster.insert(Capability::Vision, model("a/vision:1"));
        let selection = roster.select(Capability::Vision).unwrap();
        assert_eq!(selection.model, model("a/vision:1"));
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn vision_falls_back_to_text_model() {
        let mut roster = ModelRoster::new();
        roster.insert(Capability::Text, model("yorickvp/llava-13b:abc"));
        let selection = roster.select(Capability::Vision).unwrap();
        assert_eq!(selection.model, model("yorickvp/llava-13b:abc"));
        assert_eq!(selection.capability, Capability::Vision);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No vision model configured; using text model 'yorickvp/llava-13b:abc'.")
        );
    }

    #[test]
    fn text_falls_back_to_vision_model() {
        let mut roster = ModelRoster::new();
        roster.insert(Capability::Vision, model("a/both"));
        assert_eq!(
            roster.select(Capability::Text).unwrap().model,
            model("a/both")
        );
    }

    #[test]
    fn image_has_no_fallback() {
        let mut roster = ModelRoster::new();
        roster.insert(Capability::Text, model("a/text"));
        let err = roster.select(Capability::Image).err().unwrap_or_default();
        assert_eq!(err, "No model configured for capability 'image'.");
    }
}
