use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Who an event concerns. Service-wide events are written without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventScope {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<u32>,
}

impl EventScope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            model: None,
            stage: None,
        }
    }

    pub fn session(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        model: impl Into<String>,
        stage: u32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Some(session_id.into()),
            model: Some(model.into()),
            stage: Some(stage),
        }
    }
}

/// Append-only `events.jsonl` for the search service.
///
/// Every line is one compact object: `type`, `log_id`, `seq`, `ts`, then the
/// scope fields, then the payload (payload keys win on collision). `seq` is
/// assigned under the file lock, so it follows line order even when sessions
/// on different threads emit at once. The file is opened on the first event
/// and kept open; a failed write drops the handle so the next event reopens.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<EventSink>,
}

#[derive(Debug)]
struct EventSink {
    path: PathBuf,
    log_id: String,
    state: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    file: Option<File>,
    next_seq: u64,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, log_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(EventSink {
                path: path.into(),
                log_id: log_id.into(),
                state: Mutex::new(SinkState::default()),
            }),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        self.sink.append(event_type, None, payload)
    }

    pub fn emit_scoped(
        &self,
        event_type: &str,
        scope: &EventScope,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        self.sink.append(event_type, Some(scope), payload)
    }
}

impl EventSink {
    fn append(
        &self,
        event_type: &str,
        scope: Option<&EventScope>,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("log_id".to_string(), Value::String(self.log_id.clone()));
        event.insert("seq".to_string(), Value::from(state.next_seq));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Some(scope) = scope {
            if let Value::Object(fields) = serde_json::to_value(scope)? {
                event.extend(fields);
            }
        }
        event.extend(payload);

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = match state.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed appending to {}", self.path.display()))?;
        state.file = Some(file);
        state.next_seq += 1;

        Ok(Value::Object(event))
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening event log {}", self.path.display()))
    }
}

/// Reads every event type recorded so far, in file order.
pub fn read_event_types(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
        .collect())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::DateTime;

    use super::*;

    fn lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        let raw = fs::read_to_string(path)?;
        raw.lines()
            .map(|line| serde_json::from_str::<Value>(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "svc-123");

        let mut payload = EventPayload::new();
        payload.insert("rows".to_string(), Value::from(4));
        let emitted = writer.emit("service_started", payload)?;

        let rows = lines(&path)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], emitted);
        assert_eq!(emitted["type"], "service_started");
        assert_eq!(emitted["log_id"], "svc-123");
        assert_eq!(emitted["seq"], 0);
        assert_eq!(emitted["rows"], 4);
        assert!(emitted.get("user_id").is_none());

        DateTime::parse_from_rfc3339(emitted["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn scope_fields_precede_the_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "svc");

        let user = writer.emit_scoped(
            "message_deferred",
            &EventScope::user("42"),
            EventPayload::new(),
        )?;
        assert_eq!(user["user_id"], "42");
        assert!(user.get("session_id").is_none());
        assert!(user.get("stage").is_none());

        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), Value::from(9));
        let session = writer.emit_scoped(
            "round_started",
            &EventScope::session("42", "s-1", "dryrun-faces", 2),
            payload,
        )?;
        assert_eq!(session["session_id"], "s-1");
        assert_eq!(session["model"], "dryrun-faces");
        assert_eq!(session["stage"], 9, "payload overrides scope");
        assert_eq!(session["seq"], 1);
        Ok(())
    }

    #[test]
    fn seq_follows_line_order_across_threads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "svc");

        let workers = (0..4)
            .map(|worker| {
                let writer = writer.clone();
                thread::spawn(move || -> anyhow::Result<()> {
                    for _ in 0..25 {
                        writer.emit_scoped(
                            "candidate_rendered",
                            &EventScope::user(format!("user-{worker}")),
                            EventPayload::new(),
                        )?;
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().expect("writer thread panicked")?;
        }

        let seqs = lines(&path)?
            .iter()
            .map(|row| row["seq"].as_u64().unwrap_or(u64::MAX))
            .collect::<Vec<u64>>();
        assert_eq!(seqs, (0..100).collect::<Vec<u64>>());
        assert_eq!(read_event_types(&path)?.len(), 100);
        Ok(())
    }
}
