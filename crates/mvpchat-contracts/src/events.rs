use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL transcript of chat sessions.
///
/// Every line carries `type`, `session_id` and `ts`; the caller payload is
/// merged last and may override them. Writers derived with [`for_session`]
/// share one lazily opened file handle.
///
/// [`for_session`]: EventWriter::for_session
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    session_id: String,
    file: Arc<Mutex<Option<File>>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            session_id: session_id.into(),
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn for_session(&self, session_id: impl Into<String>) -> Self {
        Self {
            path: Arc::clone(&self.path),
            session_id: session_id.into(),
            file: Arc::clone(&self.file),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = self.envelope(event_type);
        event.extend(payload);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut slot = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(line.as_bytes())
                .with_context(|| format!("failed appending to {}", self.path.display()))?;
        }
        Ok(Value::Object(event))
    }

    fn envelope(&self, event_type: &str) -> EventPayload {
        let mut event = Map::new();
        event.insert("type".into(), event_type.into());
        event.insert("session_id".into(), self.session_id.as_str().into());
        event.insert(
            "ts".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false)
                .into(),
        );
        event
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*self.path)
            .with_context(|| format!("failed opening transcript {}", self.path.display()))
    }
}

/// Reads a transcript back, skipping blank lines.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let file =
        File::open(path).with_context(|| format!("failed opening transcript {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} is not a JSON event", path.display(), index + 1))?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{read_events, EventPayload, EventWriter};

    #[test]
    fn emitted_event_matches_written_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("route".into(), "text".into());
        let emitted = writer.emit("turn_started", payload)?;

        let events = read_events(&path)?;
        assert_eq!(events, vec![emitted]);
        assert_eq!(events[0]["type"], json!("turn_started"));
        assert_eq!(events[0]["session_id"], json!("session-1"));
        assert_eq!(events[0]["route"], json!("text"));
        DateTime::parse_from_rfc3339(events[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn caller_payload_wins_over_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-1");

        let mut payload = EventPayload::new();
        payload.insert("session_id".into(), "replayed".into());
        let emitted = writer.emit("session_started", payload)?;

        assert_eq!(emitted["type"], json!("session_started"));
        assert_eq!(emitted["session_id"], json!("replayed"));
        Ok(())
    }

    #[test]
    fn derived_writers_append_to_one_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let first = EventWriter::new(&path, "a");
        let second = first.for_session("b");

        first.emit("one", EventPayload::new())?;
        second.emit("two", EventPayload::new())?;
        first.emit("three", EventPayload::new())?;

        let pairs: Vec<(Value, Value)> = read_events(&path)?
            .into_iter()
            .map(|event| (event["type"].clone(), event["session_id"].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (json!("one"), json!("a")),
                (json!("two"), json!("b")),
                (json!("three"), json!("a")),
            ]
        );
        Ok(())
    }

    #[test]
    fn reading_a_missing_transcript_fails() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_events(&temp.path().join("absent.jsonl")).is_err());
    }
}
