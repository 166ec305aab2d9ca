// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record-processing stages and the runtime driving them.
//!
//! A stage is backed by one Tokio task (its "driver") which takes records from a bounded input
//! queue, processes them and pushes the results into a bounded output buffer. Whatever holds a
//! [`Stage`] handle talks to that task through the queues and observes it through its
//! [`Lifecycle`], published on a `watch` channel.
//!
//! Stages can only be created from within a Tokio runtime.
mod driver;
mod pipe;
mod reader;

use std::convert::Infallible;
use std::fmt;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{Stream, stream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

use crate::capabilities::Capabilities;
use crate::config::StageConfig;
use crate::error::{BoxError, StageError, WiringError};

pub use reader::StageReader;

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for StageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of stage sits behind a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Sink,
    Transform,
    Passthrough,
    /// Transform-shaped front of a wrapped composite.
    Facade,
}

impl StageKind {
    /// Capabilities a stage of this kind is constructed with.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            StageKind::Source => Capabilities::SOURCE,
            StageKind::Sink => Capabilities::SINK,
            StageKind::Transform | StageKind::Passthrough | StageKind::Facade => {
                Capabilities::DUPLEX
            }
        }
    }
}

/// Lifecycle of a stage.
///
/// ```text
/// Active ──end()──> Flushing ──drained──> Finished
///    │                  │
///    └──────error───────┴──────────────> Errored
/// ```
///
/// Sources have no write side and go from `Active` straight to `Finished`. `Finished` and
/// `Errored` are terminal.
#[derive(Clone, Debug, Default)]
pub enum Lifecycle {
    #[default]
    Active,
    Flushing,
    Finished,
    Errored(StageError),
}

impl Lifecycle {
    /// Returns true for the terminal states.
    pub fn is_settled(&self) -> bool {
        matches!(self, Lifecycle::Finished | Lifecycle::Errored(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Lifecycle::Finished)
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Lifecycle::Errored(err) => Some(err),
            _ => None,
        }
    }

    fn allows(&self, next: &Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Active, Lifecycle::Flushing)
                | (
                    Lifecycle::Active | Lifecycle::Flushing,
                    Lifecycle::Finished | Lifecycle::Errored(_)
                )
        )
    }
}

/// Item travelling through a stage's input queue.
pub(crate) enum Input<T> {
    Record(T),

    /// Failure of an upstream stage, delivered behind the records it emitted before failing.
    Failure(StageError),
}

/// State shared between all handles of a stage and its driver task.
pub(crate) struct Shared<T> {
    id: StageId,
    kind: StageKind,
    label: Option<String>,
    writer: Mutex<Option<mpsc::Sender<Input<T>>>>,
    output: Mutex<Option<mpsc::Receiver<T>>>,
    lifecycle: watch::Sender<Lifecycle>,
    /// Failure of a stage further up the chain which has not arrived in-band yet.
    upstream_failure: watch::Sender<Option<StageError>>,
    cancel: CancellationToken,
}

impl<T> Shared<T> {
    pub(crate) fn id(&self) -> StageId {
        self.id
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.borrow().clone()
    }

    pub(crate) fn error(&self) -> Option<StageError> {
        self.lifecycle.borrow().error().cloned()
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    fn transition(&self, next: Lifecycle) -> bool {
        self.lifecycle.send_if_modified(|current| {
            if !current.allows(&next) {
                return false;
            }
            *current = next;
            true
        })
    }

    pub(crate) fn finish(&self) {
        if self.transition(Lifecycle::Finished) {
            trace!(stage = %self.id, "finished");
        }
    }

    /// Moves the stage into `Errored`, closes its write side and cancels its driver.
    ///
    /// Returns false if the stage had already settled, in which case nothing changes.
    pub(crate) fn fail(&self, err: StageError) -> bool {
        if !self.transition(Lifecycle::Errored(err.clone())) {
            return false;
        }
        debug!(stage = %self.id, kind = ?err.kind(), %err, "stage failed");
        lock(&self.writer).take();
        self.cancel.cancel();
        true
    }

    /// Records that a stage further up the chain failed with `err`.
    ///
    /// The failure still travels in-band behind the records emitted before it. Until it
    /// arrives, the driver gives up on a record as soon as the output buffer has no room for
    /// it, so the stage settles even when nobody reads its output.
    pub(crate) fn notify_upstream_failure(&self, err: StageError) {
        if self.lifecycle.borrow().is_settled() {
            return;
        }
        let notified = self.upstream_failure.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(err);
            true
        });
        if notified {
            trace!(stage = %self.id, "upstream failure noted");
        }
    }

    /// Resolves once a failure further up the chain was noted.
    pub(crate) async fn upstream_failure(&self) -> StageError {
        let mut slot = self.upstream_failure.subscribe();
        let err = slot
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| slot.clone());
        match err {
            Some(err) => err,
            None => future::pending().await,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Input<T>>> {
        lock(&self.writer).clone()
    }

    fn take_sender(&self) -> Option<mpsc::Sender<Input<T>>> {
        lock(&self.writer).take()
    }

    fn take_output(&self) -> Option<mpsc::Receiver<T>> {
        lock(&self.output).take()
    }

    /// Error handed out to writers once the write side is gone.
    fn closed_error(&self) -> StageError {
        self.error()
            .unwrap_or_else(|| WiringError::Closed(self.id).into())
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a record-processing stage.
///
/// Handles are cheap to clone, all clones refer to the same stage. A handle can also be a
/// restricted view of a stage (see [`Stage::capabilities`]): composition hands out such views
/// when the chain as a whole does not accept writes even though its last stage does.
pub struct Stage<T> {
    shared: Arc<Shared<T>>,
    capabilities: Capabilities,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            capabilities: self.capabilities,
        }
    }
}

impl<T> Stage<T>
where
    T: Send + 'static,
{
    /// Creates a source emitting the items of `stream` until it ends or yields an error.
    pub fn source<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::source_with(&StageConfig::default(), stream)
    }

    pub fn source_with<S, E>(config: &StageConfig, stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let (output, records) = mpsc::channel(config.buffer_size());
        let stage = Self::from_parts(StageKind::Source, config, None, Some(records));
        tokio::spawn(driver::run_source(stage.shared.clone(), stream, output));
        stage
    }

    /// Creates a source emitting the given records, in order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::source(stream::iter(records.into_iter().map(Ok::<T, Infallible>)))
    }

    /// Creates a transform applying `transform` to every record.
    pub fn transform<F, Fut, E>(transform: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::transform_with(&StageConfig::default(), transform)
    }

    pub fn transform_with<F, Fut, E>(config: &StageConfig, transform: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let (writer, input) = mpsc::channel(config.buffer_size());
        let (output, records) = mpsc::channel(config.buffer_size());
        let stage = Self::from_parts(StageKind::Transform, config, Some(writer), Some(records));
        tokio::spawn(driver::run_transform(
            stage.shared.clone(),
            input,
            output,
            transform,
        ));
        stage
    }

    /// Creates an infallible, synchronous transform.
    pub fn map<F>(mut map: F) -> Self
    where
        F: FnMut(T) -> T + Send + 'static,
    {
        Self::transform(move |record| future::ready(Ok::<T, Infallible>(map(record))))
    }

    /// Creates a sink handing every record to `consume`.
    pub fn sink<F, Fut, E>(consume: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::sink_with(&StageConfig::default(), consume)
    }

    pub fn sink_with<F, Fut, E>(config: &StageConfig, consume: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let (writer, input) = mpsc::channel(config.buffer_size());
        let stage = Self::from_parts(StageKind::Sink, config, Some(writer), None);
        tokio::spawn(driver::run_sink(stage.shared.clone(), input, consume));
        stage
    }

    /// Creates an identity stage: every record written is read back unchanged, in order.
    pub fn passthrough() -> Self {
        Self::passthrough_with(&StageConfig::default())
    }

    pub fn passthrough_with(config: &StageConfig) -> Self {
        let (writer, input) = mpsc::channel(config.buffer_size());
        let (output, records) = mpsc::channel(config.buffer_size());
        let stage = Self::from_parts(StageKind::Passthrough, config, Some(writer), Some(records));
        tokio::spawn(driver::run_passthrough(stage.shared.clone(), input, output));
        stage
    }

    /// Writes a record into the stage, waiting while its input queue is full.
    pub async fn write(&self, record: T) -> Result<(), StageError> {
        if !self.capabilities.writable() {
            return Err(WiringError::NotWritable(self.id()).into());
        }
        let Some(sender) = self.shared.sender() else {
            return Err(self.shared.closed_error());
        };
        sender
            .send(Input::Record(record))
            .await
            .map_err(|_| self.shared.closed_error())
    }

    /// Queues a failure behind all records written so far.
    ///
    /// The stage fails with `err` once it has processed the records in front of it.
    pub(crate) async fn fail_after_pending(&self, err: StageError) {
        match self.shared.sender() {
            Some(sender) => {
                if sender.send(Input::Failure(err.clone())).await.is_err() {
                    self.shared.fail(err);
                }
            }
            None => {
                self.shared.fail(err);
            }
        }
    }
}

impl<T> Stage<T> {
    pub(crate) fn from_parts(
        kind: StageKind,
        config: &StageConfig,
        writer: Option<mpsc::Sender<Input<T>>>,
        output: Option<mpsc::Receiver<T>>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Active);
        let (upstream_failure, _) = watch::channel(None);
        let shared = Shared {
            id: StageId::next(),
            kind,
            label: config.label().map(ToOwned::to_owned),
            writer: Mutex::new(writer),
            output: Mutex::new(output),
            lifecycle,
            upstream_failure,
            cancel: CancellationToken::new(),
        };
        trace!(stage = %shared.id, ?kind, "stage created");
        Self {
            shared: Arc::new(shared),
            capabilities: kind.capabilities(),
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared<T>> {
        self.shared.clone()
    }

    /// Returns a view of the same stage restricted to `capabilities`.
    pub(crate) fn restricted(&self, capabilities: Capabilities) -> Self {
        Self {
            shared: self.shared.clone(),
            capabilities,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    /// Resolves with the stage's error once it failed, stays pending otherwise.
    pub(crate) async fn failure(&self) -> StageError {
        let mut lifecycle = self.subscribe();
        let err = lifecycle
            .wait_for(|state| state.error().is_some())
            .await
            .ok()
            .and_then(|state| state.error().cloned());
        match err {
            Some(err) => err,
            None => future::pending().await,
        }
    }

    pub fn id(&self) -> StageId {
        self.shared.id
    }

    pub fn kind(&self) -> StageKind {
        self.shared.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Capabilities of this handle.
    ///
    /// Usually the capabilities the stage was constructed with; composition may hand out views
    /// with fewer capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Returns true if both handles refer to the same stage.
    pub fn same_stage(&self, other: &Stage<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Signals end-of-input on the write side.
    ///
    /// The stage finishes after it processed every record queued before this call. Calling it
    /// more than once has no further effect.
    pub fn end(&self) -> Result<(), StageError> {
        if !self.capabilities.writable() {
            return Err(WiringError::NotWritable(self.id()).into());
        }
        if self.shared.take_sender().is_some() && self.shared.transition(Lifecycle::Flushing) {
            trace!(stage = %self.id(), "write side ended");
        }
        Ok(())
    }

    /// Tears the stage down with `err`.
    ///
    /// Records the stage already emitted stay readable, after them readers observe `err`.
    /// Destroying a settled stage has no effect.
    pub fn destroy(&self, err: StageError) {
        self.shared.fail(err);
    }

    /// Takes the output side of the stage.
    ///
    /// The output can be taken only once, either here or by [`Stage::pipe_into`].
    pub fn reader(&self) -> Result<StageReader<T>, StageError> {
        if !self.capabilities.readable() {
            return Err(WiringError::NotReadable(self.id()).into());
        }
        let records = self
            .shared
            .take_output()
            .ok_or(WiringError::OutputTaken(self.id()))?;
        Ok(StageReader::new(records, self.shared.clone()))
    }

    /// Waits until the stage settled, returning its error if it failed.
    pub async fn finished(&self) -> Result<(), StageError> {
        let mut lifecycle = self.subscribe();
        let settled = match lifecycle.wait_for(Lifecycle::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.lifecycle(),
        };
        match settled {
            Lifecycle::Errored(err) => Err(err),
            _ => Ok(()),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("label", &self.label())
            .field("capabilities", &self.capabilities)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
