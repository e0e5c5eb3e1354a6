use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::{self, Stream, StreamExt};
use mvpchat_contracts::chat::Attachment;
use mvpchat_contracts::models::ModelRef;
use mvpchat_contracts::payload::RequestPayload;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ImageTransfer, Settings};
use crate::error::ChatError;
use crate::provider::{
    read_attachment, sha256_hex, FragmentStream, InferenceProvider, ResolvedImage,
};
use crate::streaming::{response_reader, sse_events, SseEvent};

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_url: String,
    serving_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredictionMode {
    /// Ask for an SSE stream URL.
    Stream,
    /// Hold the create call open until the prediction settles.
    Wait,
}

/// Replicate HTTP client bound to one API token.
pub struct ReplicateClient {
    http: HttpClient,
    api_token: String,
    api_base: String,
    upload_url: String,
    image_transfer: ImageTransfer,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ReplicateClient {
    pub fn new(settings: &Settings) -> Result<Self, ChatError> {
        let api_token = settings.require_token()?.to_string();
        Ok(Self {
            http: HttpClient::new(),
            api_token,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            upload_url: settings.upload_url.clone(),
            image_transfer: settings.image_transfer,
            poll_interval: settings.poll_interval,
            poll_timeout: settings.poll_timeout,
        })
    }

    /// Uploads a local image and returns the URL the model can fetch it from.
    pub async fn upload_image(&self, path: &Path) -> Result<String, ChatError> {
        let bytes = read_attachment(path).await?;
        self.upload_bytes(bytes).await
    }

    async fn upload_bytes(&self, bytes: Vec<u8>) -> Result<String, ChatError> {
        debug!(upload_url = %self.upload_url, bytes = bytes.len(), "requesting upload target");
        let response = self
            .http
            .post(&self.upload_url)
            .header(AUTHORIZATION, format!("Token {}", self.api_token))
            .send()
            .await
            .map_err(|err| {
                ChatError::transport(
                    format!("Replicate upload request failed ({})", self.upload_url),
                    err,
                )
            })?;
        let payload = response_json("Replicate upload", response).await?;
        let target: UploadTarget = serde_json::from_value(payload).map_err(|err| {
            ChatError::Provider(format!("Replicate upload response malformed: {err}"))
        })?;

        let response = self
            .http
            .put(&target.upload_url)
            .header(CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await
            .map_err(|err| ChatError::transport("Replicate image transfer failed", err))?;
        ensure_success("Replicate image transfer", response).await?;
        debug!(serving_url = %target.serving_url, "image uploaded");
        Ok(target.serving_url)
    }

    fn prediction_request(
        &self,
        model: &ModelRef,
        input: Map<String, Value>,
        mode: PredictionMode,
    ) -> (String, Value) {
        let stream = mode == PredictionMode::Stream;
        match &model.version {
            Some(version) => (
                format!("{}/predictions", self.api_base),
                json!({
                    "version": version,
                    "input": input,
                    "stream": stream,
                }),
            ),
            None => (
                format!(
                    "{}/models/{}/{}/predictions",
                    self.api_base, model.owner, model.name
                ),
                json!({
                    "input": input,
                    "stream": stream,
                }),
            ),
        }
    }

    async fn create_prediction(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
        mode: PredictionMode,
    ) -> Result<Value, ChatError> {
        let (endpoint, body) = self.prediction_request(model, payload.to_input(), mode);
        debug!(%endpoint, %model, ?mode, "creating prediction");
        let mut request = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .json(&body);
        if mode == PredictionMode::Wait {
            request = request.header("Prefer", "wait");
        }
        let response = request.send().await.map_err(|err| {
            ChatError::transport(format!("Replicate request failed ({endpoint})"), err)
        })?;
        response_json("Replicate", response).await
    }

    async fn wait_for_prediction(&self, mut prediction: Value) -> Result<Value, ChatError> {
        let started = Instant::now();
        loop {
            match prediction_status(&prediction).as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => return Err(prediction_failure(&prediction)),
                "starting" | "processing" => {}
                other => {
                    return Err(ChatError::Provider(format!(
                        "Replicate prediction returned unexpected status '{other}'"
                    )))
                }
            }
            let poll_url = prediction
                .pointer("/urls/get")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ChatError::Provider("Replicate prediction missing poll URL".to_string())
                })?;
            if started.elapsed() >= self.poll_timeout {
                return Err(ChatError::Provider(format!(
                    "Replicate polling timed out after {:.1}s",
                    self.poll_timeout.as_secs_f64()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            let response = self
                .http
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|err| {
                    ChatError::transport(format!("Replicate poll request failed ({poll_url})"), err)
                })?;
            prediction = response_json("Replicate poll", response).await?;
        }
    }

    async fn open_stream(&self, stream_url: &str) -> Result<FragmentStream, ChatError> {
        debug!(%stream_url, "opening prediction stream");
        let response = self
            .http
            .get(stream_url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|err| {
                ChatError::transport(format!("Replicate stream request failed ({stream_url})"), err)
            })?;
        let response = ensure_success("Replicate stream", response).await?;
        Ok(output_fragments(sse_events(response_reader(response))))
    }
}

#[async_trait]
impl InferenceProvider for ReplicateClient {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn resolve_image(&self, attachment: &Attachment) -> Result<ResolvedImage, ChatError> {
        let bytes = read_attachment(&attachment.path).await?;
        let sha256 = sha256_hex(&bytes);
        let size = bytes.len();
        let url = match self.image_transfer {
            ImageTransfer::Upload => self.upload_bytes(bytes).await?,
            ImageTransfer::Inline => data_uri(&attachment.mime, &bytes),
        };
        Ok(ResolvedImage {
            url,
            sha256,
            bytes: size,
        })
    }

    async fn stream_text(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<FragmentStream, ChatError> {
        let prediction = self
            .create_prediction(model, payload, PredictionMode::Stream)
            .await?;
        if matches!(prediction_status(&prediction).as_str(), "failed" | "canceled") {
            return Err(prediction_failure(&prediction));
        }
        let stream_url = prediction
            .pointer("/urls/stream")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if let Some(stream_url) = stream_url {
            return self.open_stream(&stream_url).await;
        }

        warn!(%model, "prediction offered no stream URL; polling for output");
        let finished = self.wait_for_prediction(prediction).await?;
        let fragments = output_text_fragments(finished.get("output").unwrap_or(&Value::Null));
        Ok(stream::iter(fragments.into_iter().map(Ok)).boxed())
    }

    async fn generate_images(
        &self,
        model: &ModelRef,
        payload: &RequestPayload,
    ) -> Result<Vec<String>, ChatError> {
        let prediction = self
            .create_prediction(model, payload, PredictionMode::Wait)
            .await?;
        let finished = self.wait_for_prediction(prediction).await?;
        let mut urls = Vec::new();
        if let Some(output) = finished.get("output") {
            extract_output_urls(output, &mut urls);
        }
        if urls.is_empty() {
            return Err(ChatError::Provider(
                "Replicate response returned no image URLs".to_string(),
            ));
        }
        Ok(urls)
    }
}

/// Maps SSE frames to text fragments: `output` yields, `done` ends,
/// `error` fails the stream.
fn output_fragments<S>(events: S) -> FragmentStream
where
    S: Stream<Item = std::io::Result<SseEvent>> + Send + 'static,
{
    stream::try_unfold(Box::pin(events), |mut events| async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => return Err(ChatError::transport("Replicate stream read failed", err)),
            };
            match event.event.as_deref().unwrap_or("output") {
                "output" => return Ok(Some((event.data, events))),
                "done" => {
                    let reason = serde_json::from_str::<Value>(&event.data)
                        .ok()
                        .and_then(|value| {
                            value.get("reason").and_then(Value::as_str).map(str::to_string)
                        })
                        .unwrap_or_default();
                    if matches!(reason.as_str(), "canceled" | "error") {
                        return Err(ChatError::Provider(format!(
                            "Replicate stream ended early ({reason})"
                        )));
                    }
                    return Ok(None);
                }
                "error" => {
                    return Err(ChatError::Provider(format!(
                        "Replicate stream error: {}",
                        error_detail(&event.data)
                    )))
                }
                _ => continue,
            }
        }
        Ok(None)
    })
    .boxed()
}

fn output_text_fragments(output: &Value) -> Vec<String> {
    match output {
        Value::Null => Vec::new(),
        Value::String(text) => vec![text.clone()],
        Value::Array(rows) => rows
            .iter()
            .map(|row| match row {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_output_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "output"] {
                if let Some(nested) = obj.get(key) {
                    extract_output_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

fn prediction_failure(prediction: &Value) -> ChatError {
    let status = prediction_status(prediction);
    let detail = prediction
        .get("error")
        .filter(|value| !value.is_null())
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "no error detail".to_string());
    ChatError::Provider(format!("Replicate prediction {status}: {detail}"))
}

fn error_detail(data: &str) -> String {
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(data, 512))
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

async fn ensure_success(context: &str, response: HttpResponse) -> Result<HttpResponse, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Transport(format!(
        "{context} request failed ({}): {}",
        status.as_u16(),
        truncate_text(&body, 512)
    )))
}

async fn response_json(context: &str, response: HttpResponse) -> Result<Value, ChatError> {
    let response = ensure_success(context, response).await?;
    let body = response
        .text()
        .await
        .map_err(|err| ChatError::transport(format!("{context} response body read failed"), err))?;
    serde_json::from_str(&body).map_err(|err| {
        ChatError::Provider(format!("{context} returned invalid JSON payload: {err}"))
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
