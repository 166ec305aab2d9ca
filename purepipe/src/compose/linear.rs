// SPDX-License-Identifier: MIT OR Apache-2.0

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::stage::{Lifecycle, Stage};

/// Pipes `head` and `rest` together left to right and returns the terminal stage.
///
/// The terminal stage is the single point where the chain's output and errors are observed:
///
/// - A failure anywhere in the chain travels downstream behind the records emitted before it,
///   so the terminal fails with the original error after delivering that prefix.
/// - Every stage downstream of the failing one learns about the failure right away. A stage
///   whose output buffer is full does not wait for a reader anymore and fails, so the terminal
///   settles even when its output is never read. Records already buffered stay readable.
/// - Once the terminal failed, for whatever reason, every other stage of the chain is destroyed
///   with the same error. This observer is registered before any pipe exists, a failure on the
///   very first record can not slip through.
/// - A pipe which can not be built, for example because an interior stage is not readable and
///   writable, destroys the terminal with the wiring error.
///
/// When `head` does not accept writes, neither does the chain: the returned handle is the
/// terminal stage viewed without its Writable capability.
pub fn compose_linear<T, I>(head: Stage<T>, rest: I) -> Stage<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stage<T>>,
{
    let rest: Vec<Stage<T>> = rest.into_iter().collect();
    let Some((terminal, interior)) = rest.split_last() else {
        return head;
    };

    let mut upstream = Vec::with_capacity(rest.len());
    upstream.push(head.clone());
    upstream.extend(interior.iter().cloned());

    for (index, stage) in upstream.iter().enumerate() {
        let downstream = rest[index..].to_vec();
        tokio::spawn(announce_failure(stage.subscribe(), downstream));
    }
    tokio::spawn(teardown(terminal.subscribe(), upstream));

    let mut acc = &head;
    for stage in &rest {
        if let Err(err) = acc.pipe_into(stage) {
            warn!(from = %acc.id(), to = %stage.id(), %err, "could not pipe stages");
            terminal.destroy(err);
            break;
        }
        acc = stage;
    }

    debug!(
        head = %head.id(),
        terminal = %terminal.id(),
        len = rest.len() + 1,
        "composed linear chain"
    );

    if head.capabilities().writable() {
        terminal.clone()
    } else {
        terminal.restricted(terminal.capabilities().without_writable())
    }
}

async fn announce_failure<T>(
    mut lifecycle: watch::Receiver<Lifecycle>,
    downstream: Vec<Stage<T>>,
) {
    let err = match lifecycle.wait_for(Lifecycle::is_settled).await {
        Ok(state) => match state.error() {
            Some(err) => err.clone(),
            None => return,
        },
        Err(_) => return,
    };

    for stage in downstream {
        stage.shared().notify_upstream_failure(err.clone());
    }
}

async fn teardown<T>(mut lifecycle: watch::Receiver<Lifecycle>, upstream: Vec<Stage<T>>) {
    let err = match lifecycle.wait_for(Lifecycle::is_settled).await {
        Ok(state) => match state.error() {
            Some(err) => err.clone(),
            None => return,
        },
        Err(_) => return,
    };

    for stage in upstream {
        stage.destroy(err.clone());
    }
}
