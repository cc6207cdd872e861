#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_headless::config::{
    Backend, HeadlessConfig, InputFormat, OutputFormat, PermissionMode, PermissionSettings,
};
use agent_headless::session::{Session, SessionExit};
use agent_headless::tools::LocalTools;
use agent_api::AgentTransport;
use agent_wire::OutboundEvent;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turn_engine::EventSink;

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn config(input_format: InputFormat, mode: PermissionMode) -> HeadlessConfig {
    HeadlessConfig {
        backend: Backend::Mock,
        base_url: None,
        agent_id: Some("agent-test".to_string()),
        api_key: None,
        timeout: None,
        max_retries: 3,
        queue_capacity: 16,
        output_format: OutputFormat::StreamJson,
        input_format,
        permissions: PermissionSettings {
            mode,
            ..PermissionSettings::default()
        },
        prompt: None,
        workspace: None,
    }
}

/// Forwards every event to a channel and keeps a copy.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<OutboundEvent>,
    seen: Mutex<Vec<OutboundEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sender,
                seen: Mutex::new(Vec::new()),
            }),
            receiver,
        )
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        lock_unpoisoned(&self.seen).clone()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: OutboundEvent) {
        lock_unpoisoned(&self.seen).push(event.clone());
        let _ = self.sender.send(event);
    }
}

/// Waits for the next event matching `predicate`, skipping others.
pub async fn next_event<F>(
    receiver: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    predicate: F,
) -> OutboundEvent
where
    F: Fn(&OutboundEvent) -> bool,
{
    let wait = async {
        loop {
            match receiver.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed before a matching event"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

/// Session wired to an in-memory stdin the test writes lines into.
pub struct LiveSession {
    pub stdin: DuplexStream,
    pub events: mpsc::UnboundedReceiver<OutboundEvent>,
    pub sink: Arc<ChannelSink>,
    pub task: JoinHandle<SessionExit>,
    pub workspace: TempDir,
}

impl LiveSession {
    pub fn start(config: HeadlessConfig, transport: Arc<dyn AgentTransport>) -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        let tools = Arc::new(LocalTools::new(workspace.path()).expect("workspace"));
        let (sink, events) = ChannelSink::new();
        let session = Session::new(&config, "session-test", transport, tools, sink.clone());

        let (stdin, reader) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(session.run(Some(BufReader::new(reader))));

        Self {
            stdin,
            events,
            sink,
            task,
            workspace,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write stdin");
    }

    /// Closes stdin and waits for the session to finish.
    pub async fn finish(self) -> (SessionExit, Vec<OutboundEvent>, TempDir) {
        let Self {
            stdin,
            task,
            sink,
            workspace,
            ..
        } = self;
        drop(stdin);
        let exit = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("session should finish")
            .expect("session task");
        (exit, sink.events(), workspace)
    }
}
