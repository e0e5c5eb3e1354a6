use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mvpchat_contracts::chat::{classify_route, Route, Turn};
use mvpchat_contracts::events::{EventPayload, EventWriter};
use mvpchat_contracts::history::HistoryStore;
use mvpchat_contracts::models::{Capability, ModelRef, ModelRoster};
use mvpchat_contracts::payload::{PromptStyle, RequestPayload};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::ChatError;
use crate::provider::{connect, InferenceProvider};

/// Where a turn's output goes. The chat host implements this.
#[async_trait]
pub trait TurnSink: Send {
    async fn stream_fragment(&mut self, fragment: &str) -> std::io::Result<()>;

    async fn send(&mut self, message: &str) -> std::io::Result<()>;

    async fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    pub prompt_style: PromptStyle,
    /// Pause after each displayed fragment.
    pub stream_delay: Duration,
}

impl From<&Settings> for TurnOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            prompt_style: settings.prompt_style,
            stream_delay: settings.stream_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub route: Route,
    pub model: ModelRef,
    /// Accumulated reply text, or the composed message for image generation.
    pub reply: String,
    pub fragments: usize,
    pub image_url: Option<String>,
}

struct StreamedReply {
    text: String,
    fragments: usize,
}

/// Per-connection chat state: rolling history plus the provider handle.
pub struct Session {
    id: String,
    history: HistoryStore,
    provider: Arc<dyn InferenceProvider>,
    models: ModelRoster,
    options: TurnOptions,
    events: Option<EventWriter>,
}

impl Session {
    /// Connects to Replicate. Fails before any state exists when the API
    /// token is missing.
    pub fn start(settings: &Settings) -> Result<Self, ChatError> {
        Self::start_with_provider("replicate", settings)
    }

    pub fn start_with_provider(provider: &str, settings: &Settings) -> Result<Self, ChatError> {
        let provider = connect(provider, settings)?;
        if provider.name() == "replicate" {
            for (capability, model) in settings.models.unpinned() {
                warn!(
                    %capability,
                    %model,
                    "model has no version; only official Replicate models run unpinned"
                );
            }
        }
        Ok(Self::with_provider(settings, provider))
    }

    pub fn with_provider(settings: &Settings, provider: Arc<dyn InferenceProvider>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            history: HistoryStore::new(settings.history_max_exchanges),
            provider,
            models: settings.models.clone(),
            options: TurnOptions::from(settings),
            events: None,
        }
    }

    /// Attaches a transcript; the writer is rebound to this session's id.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        let events = events.for_session(self.id.clone());
        self.events = Some(events);
        self.emit(
            "session_started",
            json!({
                "provider": self.provider.name(),
                "prompt_style": self.options.prompt_style.as_str(),
                "history_max_exchanges": self.history.max_exchanges(),
            }),
        );
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn history(&self) -> &[String] {
        self.history.read()
    }

    pub fn reset_history(&mut self) {
        self.history.reset();
        self.emit("history_reset", json!({"reason": "requested"}));
    }

    pub fn models(&self) -> &ModelRoster {
        &self.models
    }

    pub fn set_model(&mut self, capability: Capability, model: ModelRef) {
        info!(session = %self.id, %capability, %model, "model override");
        self.models.insert(capability, model);
    }

    pub fn prompt_style(&self) -> PromptStyle {
        self.options.prompt_style
    }

    pub fn set_prompt_style(&mut self, style: PromptStyle) {
        self.options.prompt_style = style;
    }

    /// Routes one turn, displays its output through `sink` and updates history.
    ///
    /// Vision turns reset history before anything else, so a failure leaves it
    /// empty. Text and vision turns append their exchange only after the full
    /// reply has streamed. Image generation never touches history.
    pub async fn handle_turn(
        &mut self,
        turn: &Turn,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome, ChatError> {
        let route = classify_route(turn);
        if route == Route::Vision {
            self.history.reset();
            self.emit("history_reset", json!({"reason": "image_attached"}));
        }

        let selection = self
            .models
            .select(route.capability())
            .map_err(ChatError::Configuration)?;
        if let Some(reason) = &selection.fallback_reason {
            debug!(session = %self.id, "{reason}");
        }
        let model = selection.model;
        info!(session = %self.id, route = route.as_str(), %model, "handling turn");
        self.emit(
            "turn_started",
            json!({
                "route": route.as_str(),
                "model": model.to_string(),
                "attachments": turn.attachments.len(),
            }),
        );

        let result = match route {
            Route::Vision => self.run_vision(turn, model, sink).await,
            Route::ImageGeneration => self.run_image_generation(turn, model, sink).await,
            Route::Text => self.run_text(turn, model, sink).await,
        };

        match &result {
            Ok(outcome) => {
                self.emit(
                    "turn_completed",
                    json!({
                        "route": outcome.route.as_str(),
                        "model": outcome.model.to_string(),
                        "fragments": outcome.fragments,
                        "chars": outcome.reply.chars().count(),
                        "history_len": self.history.len(),
                    }),
                );
            }
            Err(err) => {
                warn!(session = %self.id, route = route.as_str(), error = %err, "turn failed");
                self.emit(
                    "turn_failed",
                    json!({
                        "route": route.as_str(),
                        "error": err.to_string(),
                    }),
                );
            }
        }
        result
    }

    async fn run_vision(
        &mut self,
        turn: &Turn,
        model: ModelRef,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome, ChatError> {
        let image = turn
            .first_image()
            .ok_or_else(|| ChatError::Configuration("vision turn without an image".to_string()))?;
        let resolved = self.provider.resolve_image(image).await?;
        self.emit(
            "attachment_resolved",
            json!({
                "path": image.path.to_string_lossy(),
                "mime": image.mime,
                "bytes": resolved.bytes,
                "sha256": resolved.sha256,
                "inline": resolved.url.starts_with("data:"),
            }),
        );

        let prompt = self.options.prompt_style.compose(&turn.text);
        let payload = RequestPayload::vision(resolved.url, prompt);
        let reply = self.stream_reply(&model, &payload, sink).await?;
        self.history.record_exchange(&turn.text, &reply.text);
        Ok(TurnOutcome {
            route: Route::Vision,
            model,
            reply: reply.text,
            fragments: reply.fragments,
            image_url: None,
        })
    }

    async fn run_text(
        &mut self,
        turn: &Turn,
        model: ModelRef,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome, ChatError> {
        let prompt = self.options.prompt_style.compose(&turn.text);
        let payload = RequestPayload::text(prompt, self.history.read());
        let reply = self.stream_reply(&model, &payload, sink).await?;
        self.history.record_exchange(&turn.text, &reply.text);
        Ok(TurnOutcome {
            route: Route::Text,
            model,
            reply: reply.text,
            fragments: reply.fragments,
            image_url: None,
        })
    }

    async fn run_image_generation(
        &mut self,
        turn: &Turn,
        model: ModelRef,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome, ChatError> {
        let payload = RequestPayload::image_generation(turn.text.clone());
        let urls = self.provider.generate_images(&model, &payload).await?;
        let Some(url) = urls.into_iter().next() else {
            return Err(ChatError::Provider(
                "image model returned no result URLs".to_string(),
            ));
        };
        let message = format!("Here is the generated image: {url}");
        sink.send(&message).await?;
        sink.finish().await?;
        self.emit("image_generated", json!({"url": url}));
        Ok(TurnOutcome {
            route: Route::ImageGeneration,
            model,
            reply: message,
            fragments: 0,
            image_url: Some(url),
        })
    }

    async fn stream_reply(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
        sink: &mut dyn TurnSink,
    ) -> Result<StreamedReply, ChatError> {
        let mut fragments = self.provider.stream_text(model, payload).await?;
        let mut text = String::new();
        let mut count = 0;
        while let Some(fragment) = fragments.try_next().await? {
            sink.stream_fragment(&fragment).await?;
            text.push_str(&fragment);
            count += 1;
            if !self.options.stream_delay.is_zero() {
                tokio::time::sleep(self.options.stream_delay).await;
            }
        }
        sink.finish().await?;
        Ok(StreamedReply {
            text,
            fragments: count,
        })
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = events.emit(event_type, payload) {
            warn!(session = %self.id, error = %err, "failed to append session event");
        }
    }
}
