#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use maestro_core::{
    ConnectRequest, GenerationParameters, GenerativeEngine, GenerativeSession, MaestroError,
    Result, SessionMessage, WeightedPrompt,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prompts(usize),
    Parameters(GenerationParameters),
    StartPlayback,
    ResetContext,
    Close,
}

enum Feed {
    Audio(Vec<Vec<u8>>),
    Fail(String),
}

/// Engine double that records every session call and lets tests inject
/// audio or crash the current session.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    parameter_delay: Arc<Mutex<Duration>>,
    fail_close: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Call>>>,
    feed: Mutex<Option<mpsc::UnboundedSender<Feed>>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Makes every connect attempt take `delay` instead of 10 ms.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock() = Some(delay);
    }

    /// Makes every `set_parameters` call take `delay`.
    pub fn set_parameter_delay(&self, delay: Duration) {
        *self.inner.parameter_delay.lock() = delay;
    }

    pub fn fail_closes(&self) {
        self.inner.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    pub fn count(&self, call: &Call) -> usize {
        self.inner.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn parameters(&self) -> Vec<GenerationParameters> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Parameters(params) => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_parameters(&self) -> Option<GenerationParameters> {
        self.inner.calls.lock().iter().rev().find_map(|call| match call {
            Call::Parameters(params) => Some(params.clone()),
            _ => None,
        })
    }

    /// Delivers audio chunks through the live session. Returns false if no
    /// session is connected.
    pub fn emit_audio(&self, chunks: Vec<Vec<u8>>) -> bool {
        self.send(Feed::Audio(chunks))
    }

    /// Makes the live session's receive stream fail.
    pub fn crash_session(&self, reason: &str) -> bool {
        self.send(Feed::Fail(reason.to_string()))
    }

    fn send(&self, feed: Feed) -> bool {
        self.inner
            .feed
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(feed).is_ok())
    }
}

#[async_trait]
impl GenerativeEngine for RecordingEngine {
    async fn connect(&self, _request: &ConnectRequest) -> Result<Box<dyn GenerativeSession>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let delay = (*self.inner.connect_delay.lock()).unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;

        let failing = self.inner.fail_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.fail_connects.store(failing - 1, Ordering::SeqCst);
            return Err(MaestroError::msg("engine refused connection"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.feed.lock() = Some(tx);
        Ok(Box::new(RecordingSession {
            calls: self.inner.calls.clone(),
            parameter_delay: self.inner.parameter_delay.clone(),
            fail_close: self.inner.fail_close.clone(),
            feed: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct RecordingSession {
    calls: Arc<Mutex<Vec<Call>>>,
    parameter_delay: Arc<Mutex<Duration>>,
    fail_close: Arc<AtomicBool>,
    feed: tokio::sync::Mutex<mpsc::UnboundedReceiver<Feed>>,
}

impl RecordingSession {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl GenerativeSession for RecordingSession {
    async fn next_message(&self) -> Result<Option<SessionMessage>> {
        match self.feed.lock().await.recv().await {
            Some(Feed::Audio(chunks)) => Ok(Some(SessionMessage {
                audio_chunks: chunks.into_iter().map(Into::into).collect(),
            })),
            Some(Feed::Fail(reason)) => Err(MaestroError::msg(reason)),
            None => Ok(None),
        }
    }

    async fn set_parameters(&self, parameters: &GenerationParameters) -> Result<()> {
        let delay = *self.parameter_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Parameters(parameters.clone()));
        Ok(())
    }

    async fn set_prompts(&self, prompts: &[WeightedPrompt]) -> Result<()> {
        self.record(Call::Prompts(prompts.len()));
        Ok(())
    }

    async fn start_playback(&self) -> Result<()> {
        self.record(Call::StartPlayback);
        Ok(())
    }

    async fn reset_context(&self) -> Result<()> {
        self.record(Call::ResetContext);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(MaestroError::msg("close handshake failed"));
        }
        Ok(())
    }
}
