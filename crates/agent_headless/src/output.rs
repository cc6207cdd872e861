use std::io::{self, Write};
use std::sync::Mutex;

use agent_wire::{Envelope, OutboundEvent, ResultEvent};
use turn_engine::EventSink;
use uuid::Uuid;

use crate::config::OutputFormat;
use crate::lock_unpoisoned;

struct OutputState {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    last_result: Option<ResultEvent>,
}

/// Writes emitted events to stdout in the selected format.
///
/// `stream-json` writes every event as one envelope line as it happens.
/// `json` keeps only the last `result` and writes it from [`finish`].
/// `text` writes each turn's result text to stdout and errors to stderr.
///
/// [`finish`]: OutputWriter::finish
pub struct OutputWriter {
    format: OutputFormat,
    session_id: String,
    state: Mutex<OutputState>,
}

impl OutputWriter {
    pub fn stdio(format: OutputFormat, session_id: impl Into<String>) -> Self {
        Self::with_writers(
            format,
            session_id,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    pub fn with_writers(
        format: OutputFormat,
        session_id: impl Into<String>,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            format,
            session_id: session_id.into(),
            state: Mutex::new(OutputState {
                out,
                err,
                last_result: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Flushes buffered output; in `json` format this writes the result.
    pub fn finish(&self) {
        let mut state = lock_unpoisoned(&self.state);
        if self.format == OutputFormat::Json {
            if let Some(result) = state.last_result.take() {
                let line = self.envelope_line(OutboundEvent::Result(result));
                write_line(&mut state.out, &line);
            }
        }
        if let Err(error) = state.out.flush() {
            tracing::warn!(%error, "failed to flush stdout");
        }
    }

    fn envelope_line(&self, event: OutboundEvent) -> String {
        let envelope = Envelope::new(self.session_id.clone(), Uuid::new_v4().to_string(), event);
        match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(error) => {
                tracing::error!(%error, "failed to serialize event");
                String::new()
            }
        }
    }
}

impl EventSink for OutputWriter {
    fn emit(&self, event: OutboundEvent) {
        let mut state = lock_unpoisoned(&self.state);
        match self.format {
            OutputFormat::StreamJson => {
                let line = self.envelope_line(event);
                write_line(&mut state.out, &line);
            }
            OutputFormat::Json => match event {
                OutboundEvent::Result(result) => state.last_result = Some(result),
                OutboundEvent::Error(error) => write_line(&mut state.err, &error.message),
                _ => {}
            },
            OutputFormat::Text => match event {
                OutboundEvent::Result(ResultEvent {
                    result: Some(text), ..
                }) => write_line(&mut state.out, &text),
                OutboundEvent::Error(error) => {
                    write_line(&mut state.err, &format!("Error: {}", error.message));
                }
                _ => {}
            },
        }
    }
}

fn write_line(writer: &mut Box<dyn Write + Send>, line: &str) {
    if line.is_empty() {
        return;
    }
    let written = writeln!(writer, "{line}").and_then(|()| writer.flush());
    if let Err(error) = written {
        tracing::warn!(%error, "failed to write output line");
    }
}
