// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures_util::StreamExt;

use crate::error::{BoxError, StageError};
use crate::stage::Stage;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Source emitting `1..=limit`.
pub fn numbers(limit: u64) -> Stage<u64> {
    Stage::from_records(1..=limit)
}

/// Source emitting odd numbers below `limit`, failing at the first even one.
pub fn bad_numbers(limit: u64) -> Stage<u64> {
    Stage::source(stream! {
        for i in 1..limit {
            if i % 2 == 0 {
                yield Err(BoxError::from("I refuse to yield even numbers"));
                break;
            }
            yield Ok(i);
        }
    })
}

/// Sink collecting every record it receives.
pub fn collector<T>() -> (Stage<T>, Arc<Mutex<Vec<T>>>)
where
    T: Send + 'static,
{
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Stage::sink({
        let values = values.clone();
        move |record| {
            values.lock().unwrap().push(record);
            async { Ok::<(), BoxError>(()) }
        }
    });
    (sink, values)
}

/// Reads the output of `stage` until it ends, returning the records and the error it ended with.
pub async fn drain<T>(stage: &Stage<T>) -> (Vec<T>, Option<StageError>) {
    let mut reader = stage.reader().expect("stage is readable");
    let mut values = Vec::new();
    while let Some(item) = reader.next().await {
        match item {
            Ok(value) => values.push(value),
            Err(err) => return (values, Some(err)),
        }
    }
    (values, None)
}
