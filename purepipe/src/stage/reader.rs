// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::FusedStream;
use futures_util::{Stream, ready};
use pin_project::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::StageError;
use crate::stage::{Lifecycle, Shared};

/// Output side of a stage, see [`Stage::reader`](crate::Stage::reader).
///
/// Yields every record the stage emitted, in order. If the stage failed, the error is yielded
/// once after the last emitted record and the stream ends.
#[pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct StageReader<T> {
    #[pin]
    records: ReceiverStream<T>,
    shared: Arc<Shared<T>>,
    terminated: bool,
}

impl<T> StageReader<T> {
    pub(crate) fn new(records: mpsc::Receiver<T>, shared: Arc<Shared<T>>) -> Self {
        Self {
            records: ReceiverStream::new(records),
            shared,
            terminated: false,
        }
    }

    /// Fails the stage this reader belongs to, unless it settled already.
    pub(crate) fn fail_stage(&self, err: StageError) {
        self.shared.fail(err);
    }
}

impl<T> Stream for StageReader<T> {
    type Item = Result<T, StageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.terminated {
            return Poll::Ready(None);
        }

        match ready!(this.records.poll_next(cx)) {
            Some(record) => Poll::Ready(Some(Ok(record))),
            None => {
                // The output buffer closes only after the driver settled the lifecycle.
                *this.terminated = true;
                match this.shared.lifecycle() {
                    Lifecycle::Errored(err) => Poll::Ready(Some(Err(err))),
                    _ => Poll::Ready(None),
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.terminated {
            (0, Some(0))
        } else {
            (0, None)
        }
    }
}

impl<T> FusedStream for StageReader<T> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T> fmt::Debug for StageReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageReader")
            .field("stage", &self.shared.id())
            .field("terminated", &self.terminated)
            .finish()
    }
}
