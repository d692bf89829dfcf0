use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use autostream_core::domain::lead::{LeadAck, LeadRecord};

/// Destination for completed leads. Called at most once per conversation.
#[async_trait]
pub trait LeadCaptureGateway: Send + Sync {
    fn name(&self) -> &'static str;
    async fn capture(&self, record: &LeadRecord) -> Result<LeadAck>;
}

/// Mock backend that prints the captured lead to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleLeadCapture;

#[async_trait]
impl LeadCaptureGateway for ConsoleLeadCapture {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn capture(&self, record: &LeadRecord) -> Result<LeadAck> {
        let mut stdout = std::io::stdout().lock();
        writeln!(
            stdout,
            "Lead captured successfully: {}, {}, {}",
            record.name, record.email, record.platform
        )
        .context("failed to write captured lead")?;
        stdout.flush().context("failed to flush captured lead")?;
        Ok(LeadAck::issue())
    }
}

#[derive(Debug, Default)]
struct Recorder {
    captured: Vec<LeadRecord>,
    attempts: usize,
    failures_left: usize,
}

/// Records every capture in memory. Can be told to fail the first N calls.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLeadCapture {
    inner: Arc<Mutex<Recorder>>,
}

impl InMemoryLeadCapture {
    pub fn failing(times: usize) -> Self {
        let recorder = Recorder { failures_left: times, ..Recorder::default() };
        Self { inner: Arc::new(Mutex::new(recorder)) }
    }

    pub fn captured(&self) -> Vec<LeadRecord> {
        match self.inner.lock() {
            Ok(recorder) => recorder.captured.clone(),
            Err(poisoned) => poisoned.into_inner().captured.clone(),
        }
    }

    pub fn attempts(&self) -> usize {
        match self.inner.lock() {
            Ok(recorder) => recorder.attempts,
            Err(poisoned) => poisoned.into_inner().attempts,
        }
    }
}

#[async_trait]
impl LeadCaptureGateway for InMemoryLeadCapture {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn capture(&self, record: &LeadRecord) -> Result<LeadAck> {
        let mut recorder = match self.inner.lock() {
            Ok(recorder) => recorder,
            Err(poisoned) => poisoned.into_inner(),
        };
        recorder.attempts += 1;
        if recorder.failures_left > 0 {
            recorder.failures_left -= 1;
            anyhow::bail!("lead capture backend unavailable");
        }
        recorder.captured.push(record.clone());
        Ok(LeadAck::issue())
    }
}
