// SPDX-License-Identifier: MIT OR Apache-2.0

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{StageError, WiringError};
use crate::stage::{Input, Stage, StageReader};

impl<T> Stage<T>
where
    T: Send + 'static,
{
    /// Pipes the output of this stage into `dst`.
    ///
    /// Records are forwarded in order. Once this stage finishes, `dst` receives end-of-input.
    /// If this stage fails, the failure is queued behind the records it emitted before, and
    /// `dst` fails with the very same error after processing them.
    ///
    /// Takes the output of this stage; fails without side effects if this stage is not readable,
    /// `dst` is not writable or either side is already in use or closed.
    pub fn pipe_into(&self, dst: &Stage<T>) -> Result<(), StageError> {
        if !dst.capabilities().writable() {
            return Err(WiringError::NotWritable(dst.id()).into());
        }
        let Some(sender) = dst.shared.sender() else {
            return Err(dst.shared.closed_error());
        };
        let reader = self.reader()?;

        trace!(from = %self.id(), to = %dst.id(), "pipe");
        tokio::spawn(forward(reader, sender, dst.clone()));
        Ok(())
    }
}

async fn forward<T>(mut reader: StageReader<T>, sender: mpsc::Sender<Input<T>>, dst: Stage<T>) {
    while let Some(item) = reader.next().await {
        let (frame, failed) = match item {
            Ok(record) => (Input::Record(record), false),
            Err(err) => (Input::Failure(err), true),
        };

        if sender.send(frame).await.is_err() {
            // The downstream driver is gone, so its lifecycle has settled.
            trace!(to = %dst.id(), "downstream closed, unpiping");
            if let Some(err) = dst.shared.error() {
                reader.fail_stage(err);
            }
            return;
        }

        if failed {
            return;
        }
    }

    drop(sender);
    // Checked to be writable when the pipe was built.
    let _ = dst.end();
}
