// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use futures_util::{StreamExt, future};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::compose::linear::compose_linear;
use crate::config::StageConfig;
use crate::error::{StageError, WiringError};
use crate::stage::{Input, Shared, Stage, StageKind};

/// Wraps `stages` behind a new transform-shaped facade, making the chain reusable as a building
/// block of further compositions.
///
/// The facade is always readable and writable, regardless of the capabilities of the wrapped
/// chain:
///
/// - Records written into the facade are queued into an internal passthrough at the head of the
///   chain. A write is acknowledged once it is queued there, not when it went through the chain.
/// - Records emitted by the last stage of the chain are emitted by the facade, in order.
/// - Ending the facade ends the chain. The facade itself finishes only after the last stage of
///   the chain finished, so every side effect of the chain happened by then.
/// - A failure of the chain fails the facade with the same error, after the records emitted
///   before it. If nobody reads the facade and its buffer is full, the facade fails right away.
///   Destroying the facade destroys the chain.
pub fn wrap_reusable<T, I>(config: &StageConfig, stages: I) -> Stage<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stage<T>>,
{
    let front = Stage::passthrough_with(&config.child("front"));
    let tail = compose_linear(front.clone(), stages);

    let (writer, input) = mpsc::channel(config.buffer_size());
    let (output, records) = mpsc::channel(config.buffer_size());
    let facade = Stage::from_parts(StageKind::Facade, config, Some(writer), Some(records));

    debug!(
        facade = %facade.id(),
        front = %front.id(),
        tail = %tail.id(),
        "wrapped chain behind facade"
    );
    tokio::spawn(run_facade(facade.shared(), input, output, front, tail));
    facade
}

async fn run_facade<T>(
    shared: Arc<Shared<T>>,
    mut input: mpsc::Receiver<Input<T>>,
    output: mpsc::Sender<T>,
    front: Stage<T>,
    tail: Stage<T>,
) where
    T: Send + 'static,
{
    let intake = async {
        while let Some(frame) = input.recv().await {
            match frame {
                Input::Record(record) => front.write(record).await?,
                Input::Failure(err) => {
                    // Routed through the chain so it surfaces behind the records written so far.
                    front.fail_after_pending(err).await;
                    return Ok::<(), StageError>(());
                }
            }
        }

        trace!(facade = %shared.id(), "write side ended, flushing chain");
        front.end()
    };

    let relay = async {
        if tail.capabilities().readable() {
            let mut records = tail.reader()?;
            while let Some(record) = records.next().await {
                let record = record?;
                // A full buffer is not waited on once the chain or its upstream failed.
                tokio::select! {
                    biased;
                    sent = output.send(record) => {
                        if sent.is_err() {
                            return Err(StageError::from(WiringError::Detached(shared.id())));
                        }
                    }
                    err = tail.failure() => return Err(err),
                    err = shared.upstream_failure() => return Err(err),
                }
            }
        }

        tail.finished().await
    };

    let result = tokio::select! {
        biased;
        _ = shared.cancelled() => None,
        result = future::try_join(intake, relay) => Some(result),
    };

    match result {
        Some(Ok(_)) => {
            shared.finish();
            debug!(facade = %shared.id(), "chain drained, facade finished");
        }
        Some(Err(err)) => {
            shared.fail(err.clone());
            tail.destroy(err);
        }
        None => {
            if let Some(err) = shared.error() {
                tail.destroy(err);
            }
        }
    }
}
