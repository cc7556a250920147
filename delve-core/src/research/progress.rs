//! Progress notifications emitted by the research engine.
//!
//! Every state transition produces exactly one [`ProgressEvent`]. Observers
//! plug in through the [`ProgressReporter`] trait; thin adapters cover plain
//! closures, async closures, channels and recording for tests. The engine
//! talks to observers only through [`ProgressChannel`], which stamps events
//! with the injected clock and keeps a misbehaving observer from failing the
//! session.

use super::clock::Clock;
use crate::error::ResearchError;
use crate::search::SourceItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Where the engine goes after a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Start another main-loop iteration.
    Continue,
    /// The last search came back empty; generate a new query and try again.
    RetrySearch,
    /// The loop budget is spent.
    Finalize,
}

/// The payload of a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    #[serde(rename = "generate_query")]
    QueryGeneration { query: String, rationale: String },
    WebResearch {
        sources: Vec<SourceItem>,
        images: Vec<String>,
    },
    Summarize { summary: String },
    Reflection { query: String, knowledge_gap: String },
    Routing {
        decision: RoutingDecision,
        loop_count: u32,
    },
    Finalize,
    ResearchComplete {
        summary: String,
        sources: Vec<SourceItem>,
        images: Vec<String>,
    },
    /// A non-fatal problem the session recovered from.
    Error { message: String },
}

impl ProgressKind {
    /// The wire name of this kind, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressKind::QueryGeneration { .. } => "generate_query",
            ProgressKind::WebResearch { .. } => "web_research",
            ProgressKind::Summarize { .. } => "summarize",
            ProgressKind::Reflection { .. } => "reflection",
            ProgressKind::Routing { .. } => "routing",
            ProgressKind::Finalize => "finalize",
            ProgressKind::ResearchComplete { .. } => "research_complete",
            ProgressKind::Error { .. } => "error",
        }
    }
}

/// A timestamped progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

/// Why an observer could not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    /// The observer saw the session's token fire while handling the event.
    #[error("reporting was cancelled")]
    Cancelled,
    /// Any other observer failure. Logged and ignored by the engine.
    #[error("observer failed: {0}")]
    Observer(String),
}

/// Receives progress events in emission order.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(
        &self,
        event: &ProgressEvent,
        cancel: &CancellationToken,
    ) -> Result<(), ReportError>;
}

/// Turn a caught panic payload into an observer error.
fn panic_to_observer_error(payload: Box<dyn Any + Send>) -> ReportError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "callback panicked".to_string());
    ReportError::Observer(message)
}

/// Adapts a synchronous closure. Panics inside the closure are contained.
pub struct CallbackReporter<F> {
    callback: F,
}

impl<F> CallbackReporter<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressReporter for CallbackReporter<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    async fn report(
        &self,
        event: &ProgressEvent,
        _cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        catch_unwind(AssertUnwindSafe(|| (self.callback)(event))).map_err(panic_to_observer_error)
    }
}

/// Adapts an async closure that receives an owned event and the session token.
/// Panics while building or polling the future are contained.
pub struct AsyncFnReporter<F> {
    callback: F,
}

impl<F, Fut> AsyncFnReporter<F>
where
    F: Fn(ProgressEvent, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReportError>> + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F, Fut> ProgressReporter for AsyncFnReporter<F>
where
    F: Fn(ProgressEvent, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReportError>> + Send + 'static,
{
    async fn report(
        &self,
        event: &ProgressEvent,
        cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        AssertUnwindSafe(async { (self.callback)(event.clone(), cancel.clone()).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_to_observer_error(payload)))
    }
}

/// Forwards events into a bounded tokio channel, waiting for capacity.
pub struct ChannelReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressReporter for ChannelReporter {
    async fn report(
        &self,
        event: &ProgressEvent,
        cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReportError::Cancelled),
            sent = self.tx.send(event.clone()) => {
                sent.map_err(|_| ReportError::Observer("progress receiver dropped".to_string()))
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

#[async_trait]
impl ProgressReporter for NoOpReporter {
    async fn report(
        &self,
        _event: &ProgressEvent,
        _cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        Ok(())
    }
}

/// A reporter that records all events for test assertions.
#[derive(Default)]
pub struct RecordingReporter {
    events: tokio::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<ProgressKind> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }

    /// The wire names of the recorded events, in order.
    pub async fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(
        &self,
        event: &ProgressEvent,
        _cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// The engine's single outlet for progress events.
pub(crate) struct ProgressChannel {
    reporter: Arc<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl ProgressChannel {
    pub(crate) fn new(
        reporter: Arc<dyn ProgressReporter>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reporter,
            clock,
            cancel,
        }
    }

    /// Stamp and deliver one event.
    ///
    /// Observer failures are logged and swallowed. Cancellation, whether
    /// reported by the observer or observed on the token afterwards, ends
    /// the session.
    pub(crate) async fn emit(&self, kind: ProgressKind) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        let event = ProgressEvent {
            timestamp: self.clock.now(),
            kind,
        };
        match self.reporter.report(&event, &self.cancel).await {
            Ok(()) => {}
            Err(ReportError::Cancelled) => return Err(ResearchError::Cancelled),
            Err(ReportError::Observer(message)) => {
                warn!(event = event.kind.name(), error = %message, "Progress observer failed; continuing");
            }
        }
        if self.cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        Ok(())
    }
}
