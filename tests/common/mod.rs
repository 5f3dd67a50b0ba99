//! Shared utilities for lifecycle integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kaffein::lifecycle::{Adapter, AdapterError, Context};
use tracing_subscriber::fmt::MakeWriter;

/// Ordered record of lifecycle calls, shared by every adapter in a test.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, in order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with(prefix))
            .collect()
    }
}

/// How a scripted adapter's `start` behaves.
#[derive(Clone)]
pub enum StartBehavior {
    Succeed,
    SucceedAfter(Duration),
    Fail(&'static str),
    FailAfter(Duration, &'static str),
    /// Block until the start context is cancelled, then succeed.
    WaitForCancel,
    Panic,
}

/// How a scripted adapter's `stop` behaves.
#[derive(Clone)]
pub enum StopBehavior {
    Succeed,
    Fail(&'static str),
    Hang,
    Panic,
}

/// Adapter with scripted behaviour that records every call in a journal.
pub struct ScriptedAdapter {
    name: String,
    start: StartBehavior,
    stop: StopBehavior,
    journal: Journal,
}

impl ScriptedAdapter {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            start: StartBehavior::Succeed,
            stop: StopBehavior::Succeed,
            journal: journal.clone(),
        }
    }

    pub fn on_start(mut self, behavior: StartBehavior) -> Self {
        self.start = behavior;
        self
    }

    pub fn on_stop(mut self, behavior: StopBehavior) -> Self {
        self.stop = behavior;
        self
    }

    pub fn shared(self) -> Arc<dyn Adapter> {
        Arc::new(self)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.journal.push(format!("start:{}", self.name));
        let result = match &self.start {
            StartBehavior::Succeed => Ok(()),
            StartBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            StartBehavior::Fail(message) => Err(AdapterError::msg(*message)),
            StartBehavior::FailAfter(delay, message) => {
                tokio::time::sleep(*delay).await;
                Err(AdapterError::msg(*message))
            }
            StartBehavior::WaitForCancel => {
                ctx.done().await;
                self.journal.push(format!("cancelled:{}", self.name));
                Ok(())
            }
            StartBehavior::Panic => panic!("{} exploded", self.name),
        };
        self.journal.push(format!("started:{}", self.name));
        result
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), AdapterError> {
        self.journal.push(format!("stop:{}", self.name));
        tracing::info!(adapter = %self.name, "stop called");
        match &self.stop {
            StopBehavior::Succeed => Ok(()),
            StopBehavior::Fail(message) => Err(AdapterError::msg(*message)),
            StopBehavior::Hang => std::future::pending().await,
            StopBehavior::Panic => panic!("{} stop exploded", self.name),
        }
    }
}

/// In-memory log sink for asserting on emitted log lines.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }

    /// Index of the first line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(needle))
    }

    /// Install as the thread-local subscriber for the rest of the scope.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

pub struct CapturedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}
