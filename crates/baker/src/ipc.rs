//! JSON-lines protocol between `glcv bake --isolated` and `glcv worker`.
//!
//! The parent writes [`WorkerCommand`]s to the worker's stdin, one per
//! line, and reads [`WorkerEvent`]s from its stdout. Logs go to stderr.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use glcv_codec::CodecBackend;
use glcv_common::config::BakeDefaults;
use glcv_common::error::GlcvResult;
use serde::{Deserialize, Serialize};

use crate::baker::{BakeReport, Baker, Cancellable};
use crate::progress::{BakeProgress, ProgressPublisher};
use crate::request::BakeRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Start { request: Box<BakeRequest> },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Progress(BakeProgress),
    Finished { report: BakeReport },
    Failed { message: String },
}

/// One protocol message as a single line, without the newline.
pub fn encode_line<T: Serialize>(message: &T) -> GlcvResult<String> {
    Ok(serde_json::to_string(message)?)
}

pub fn parse_command(line: &str) -> GlcvResult<WorkerCommand> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn parse_event(line: &str) -> GlcvResult<WorkerEvent> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Serializes events onto a shared line-oriented writer.
#[derive(Clone)]
pub struct EventWriter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl EventWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn send(&self, event: &WorkerEvent) -> GlcvResult<()> {
        let line = encode_line(event)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl ProgressPublisher for EventWriter {
    fn publish(&self, progress: BakeProgress) {
        if let Err(e) = self.send(&WorkerEvent::Progress(progress)) {
            tracing::warn!(error = %e, "Failed to write progress event");
        }
    }
}

/// Worker side of the protocol.
///
/// Waits for `start`, runs the bake, forwards progress, and ends with one
/// `finished` or `failed` event. A `cancel` line stops the bake; so does
/// the end of `input` when `cancel_on_eof` is set.
pub fn run_worker<R>(
    mut input: R,
    events: EventWriter,
    backend: Arc<dyn CodecBackend>,
    defaults: &BakeDefaults,
    cancel_on_eof: bool,
) -> GlcvResult<()>
where
    R: BufRead + Send + 'static,
{
    let request = loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            tracing::info!("Input closed before start");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(WorkerCommand::Start { request }) => break *request,
            Ok(WorkerCommand::Cancel) => {
                tracing::info!("Cancelled before start");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed command");
            }
        }
    };

    let handle = match Baker::bake_with_defaults(
        request,
        backend,
        Box::new(events.clone()),
        defaults,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            events.send(&WorkerEvent::Failed {
                message: e.to_string(),
            })?;
            return Err(e);
        }
    };

    let canceller = handle.canceller();
    std::thread::Builder::new()
        .name("worker-stdin".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(WorkerCommand::Cancel) => {
                        canceller.cancel();
                        return;
                    }
                    Ok(WorkerCommand::Start { .. }) => {
                        tracing::warn!("Worker already baking; start ignored");
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed command"),
                }
            }
            if cancel_on_eof {
                tracing::info!("Input closed; cancelling bake");
                canceller.cancel();
            }
        })?;

    match handle.join() {
        Ok(report) => events.send(&WorkerEvent::Finished { report }),
        Err(e) => {
            events.send(&WorkerEvent::Failed {
                message: e.to_string(),
            })?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        assert_eq!(
            parse_command(r#"{"command":"cancel"}"#).unwrap(),
            WorkerCommand::Cancel
        );
        let line = r#"{"command":"start","request":{"template":{"aspect_ratio":1.0,"units":[]},"output_path":"o.mp4"}}"#;
        let WorkerCommand::Start { request } = parse_command(line).unwrap() else {
            panic!("expected start");
        };
        assert_eq!(request.output_path.to_str(), Some("o.mp4"));
    }

    #[test]
    fn test_event_wire_format() {
        let line = encode_line(&WorkerEvent::Progress(BakeProgress::video(0.5, false))).unwrap();
        assert_eq!(
            line,
            r#"{"event":"progress","target":"video","progress":0.5,"completed":false}"#
        );
        let failed = encode_line(&WorkerEvent::Failed {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(failed, r#"{"event":"failed","message":"boom"}"#);
    }
}
