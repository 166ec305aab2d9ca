// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tasks driving the built-in stage kinds.
//!
//! Every driver observes the stage's cancellation token at each suspension point, so destroying
//! a stage stops its driver without waiting for input or buffer space. A driver always settles
//! the lifecycle before it returns and drops its output sender, readers can therefore rely on
//! the lifecycle once the output buffer is closed.
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{BoxError, StageError, WiringError};
use crate::stage::{Input, Shared};

pub(crate) async fn run_source<T, S, E>(
    shared: Arc<Shared<T>>,
    stream: S,
    output: mpsc::Sender<T>,
) where
    S: Stream<Item = Result<T, E>>,
    E: Into<BoxError>,
{
    let mut stream = pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(record)) => {
                if !emit(&shared, &output, record).await {
                    return;
                }
            }
            Some(Err(err)) => {
                shared.fail(StageError::production(err));
                return;
            }
            None => {
                shared.finish();
                return;
            }
        }
    }
}

pub(crate) async fn run_transform<T, F, Fut, E>(
    shared: Arc<Shared<T>>,
    mut input: mpsc::Receiver<Input<T>>,
    output: mpsc::Sender<T>,
    mut transform: F,
) where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    while let Some(record) = receive(&shared, &mut input).await {
        let result = tokio::select! {
            biased;
            _ = shared.cancelled() => return,
            result = transform(record) => result,
        };

        match result {
            Ok(record) => {
                if !emit(&shared, &output, record).await {
                    return;
                }
            }
            Err(err) => {
                shared.fail(StageError::production(err));
                return;
            }
        }
    }
}

pub(crate) async fn run_passthrough<T>(
    shared: Arc<Shared<T>>,
    mut input: mpsc::Receiver<Input<T>>,
    output: mpsc::Sender<T>,
) {
    while let Some(record) = receive(&shared, &mut input).await {
        if !emit(&shared, &output, record).await {
            return;
        }
    }
}

pub(crate) async fn run_sink<T, F, Fut, E>(
    shared: Arc<Shared<T>>,
    mut input: mpsc::Receiver<Input<T>>,
    mut consume: F,
) where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    while let Some(record) = receive(&shared, &mut input).await {
        let result = tokio::select! {
            biased;
            _ = shared.cancelled() => return,
            result = consume(record) => result,
        };

        if let Err(err) = result {
            shared.fail(StageError::consumption(err));
            return;
        }
    }
}

/// Takes the next record from the input queue.
///
/// Returns `None` when the driver has to stop; the lifecycle is settled by then: `Finished`
/// when the write side ended, `Errored` on cancellation or on an upstream failure.
async fn receive<T>(shared: &Shared<T>, input: &mut mpsc::Receiver<Input<T>>) -> Option<T> {
    let frame = tokio::select! {
        biased;
        _ = shared.cancelled() => return None,
        frame = input.recv() => frame,
    };

    match frame {
        Some(Input::Record(record)) => Some(record),
        Some(Input::Failure(err)) => {
            shared.fail(err);
            None
        }
        None => {
            shared.finish();
            None
        }
    }
}

/// Pushes a record into the output buffer, waiting for space.
///
/// Once a failure further up the chain is known, a full buffer is not waited on anymore: the
/// stage fails with that error instead. Returns false when the driver has to stop.
async fn emit<T>(shared: &Shared<T>, output: &mpsc::Sender<T>, record: T) -> bool {
    tokio::select! {
        biased;
        _ = shared.cancelled() => false,
        sent = output.send(record) => {
            if sent.is_err() {
                shared.fail(WiringError::Detached(shared.id()).into());
                return false;
            }
            true
        }
        err = shared.upstream_failure() => {
            shared.fail(err);
            false
        }
    }
}
