// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use futures_util::{StreamExt, stream};
use tokio::time::{sleep, timeout};

use crate::test_utils::{bad_numbers, collector, drain, numbers, setup_logging};
use crate::{
    BoxError, Capabilities, ErrorKind, Stage, StageConfig, StageError, StageKind,
    compose_pipeline, compose_pipeline_with,
};

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Word(&'static str),
    Number(u64),
}

fn words() -> Stage<Value> {
    Stage::from_records(["one", "two", "three"].map(Value::Word))
}

fn length() -> Stage<Value> {
    Stage::transform(|value: Value| async move {
        match value {
            Value::Word(word) => Ok(Value::Number(word.len() as u64)),
            Value::Number(_) => Err("expected a word"),
        }
    })
}

fn arithmetic(op: fn(u64) -> u64) -> Stage<Value> {
    Stage::transform(move |value: Value| async move {
        match value {
            Value::Number(n) => Ok(Value::Number(op(n))),
            Value::Word(_) => Err("expected a number"),
        }
    })
}

fn square() -> Stage<Value> {
    arithmetic(|n| n * n)
}

fn plus_one() -> Stage<Value> {
    arithmetic(|n| n + 1)
}

fn half() -> Stage<Value> {
    arithmetic(|n| n / 2)
}

fn numbers_of(values: Vec<Value>) -> Vec<u64> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Number(n) => Some(n),
            Value::Word(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn empty_composition_is_identity() {
    setup_logging();

    let identity: Stage<u64> = compose![];
    assert_eq!(identity.capabilities(), Capabilities::DUPLEX);

    let ((), (values, err)) = tokio::join!(
        async {
            for n in [1, 2, 3] {
                identity.write(n).await.unwrap();
            }
            identity.end().unwrap();
        },
        drain(&identity)
    );
    assert_eq!(values, vec![1, 2, 3]);
    assert!(err.is_none());
    identity.finished().await.unwrap();
}

#[tokio::test]
async fn single_stage_is_the_same_stage() {
    setup_logging();

    let double = Stage::map(|n: u64| n * 2);
    let composed = compose_pipeline([double.clone()]);
    assert!(composed.same_stage(&double));
    assert_eq!(composed.kind(), StageKind::Transform);
}

#[tokio::test]
async fn source_and_transforms() {
    setup_logging();

    let doubled = compose![numbers(3), Stage::map(|n: u64| n * 2)];
    let (values, err) = drain(&doubled).await;
    assert_eq!(values, vec![2, 4, 6]);
    assert!(err.is_none());

    let composed = compose![
        numbers(3),
        Stage::map(|n: u64| n * 2),
        Stage::map(|n: u64| n + 1),
    ];
    let (values, err) = drain(&composed).await;
    assert_eq!(values, vec![3, 5, 7]);
    assert!(err.is_none());
    composed.finished().await.unwrap();
}

#[tokio::test]
async fn source_failure_truncates_output() {
    setup_logging();

    let source = bad_numbers(10);
    let composed = compose![source.clone(), Stage::map(|n: u64| n * 2)];

    let (values, err) = drain(&composed).await;
    assert_eq!(values, vec![2]);

    let err = err.unwrap();
    assert_eq!(err.to_string(), "I refuse to yield even numbers");
    assert_eq!(err.kind(), ErrorKind::Production);
    assert!(err.ptr_eq(&source.finished().await.unwrap_err()));
    assert!(composed.finished().await.unwrap_err().ptr_eq(&err));
}

#[tokio::test]
async fn source_into_sink() {
    setup_logging();

    let (sink, values) = collector();
    let composed = compose![numbers(3), sink.clone()];
    assert!(composed.same_stage(&sink));
    assert_eq!(composed.capabilities(), Capabilities::NONE);

    composed.finished().await.unwrap();
    assert!(sink.lifecycle().is_finished());
    assert_eq!(*values.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn source_failure_reaches_sink() {
    setup_logging();

    let (sink, values) = collector();
    let composed = compose![bad_numbers(10), sink];

    let err = composed.finished().await.unwrap_err();
    assert_eq!(err.to_string(), "I refuse to yield even numbers");
    assert_eq!(*values.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn source_transform_and_sink() {
    setup_logging();

    let (sink, values) = collector();
    let composed = compose![numbers(3), Stage::map(|n: u64| n * 2), sink];

    composed.finished().await.unwrap();
    assert_eq!(*values.lock().unwrap(), vec![2, 4, 6]);
}

#[tokio::test]
async fn nested_composites_equal_flat_composition() {
    setup_logging();

    let counted = compose![words(), length()];
    let (values, _) = drain(&counted).await;
    assert_eq!(numbers_of(values), vec![3, 3, 5]);

    let first = compose![words(), length()];
    let second = compose![square(), plus_one(), half()];
    assert_eq!(first.capabilities(), Capabilities::SOURCE);
    assert_eq!(second.kind(), StageKind::Facade);

    let nested = compose![first, second];
    assert_eq!(nested.capabilities(), Capabilities::SOURCE);
    let (nested_values, err) = drain(&nested).await;
    assert!(err.is_none());
    assert_eq!(numbers_of(nested_values), vec![5, 5, 13]);

    let flat = compose![words(), length(), square(), plus_one(), half()];
    let (flat_values, err) = drain(&flat).await;
    assert!(err.is_none());
    assert_eq!(numbers_of(flat_values), vec![5, 5, 13]);
}

#[tokio::test]
async fn wrapped_composites_nest() {
    setup_logging();

    let inner = compose![Stage::map(|n: u64| n * 2), Stage::map(|n: u64| n + 1)];
    let (sink, values) = collector();
    let outer = compose![inner, Stage::map(|n: u64| n * 10), sink];
    assert_eq!(outer.kind(), StageKind::Facade);

    for n in [1, 2, 3] {
        outer.write(n).await.unwrap();
    }
    outer.end().unwrap();

    outer.finished().await.unwrap();
    assert_eq!(*values.lock().unwrap(), vec![30, 50, 70]);
}

#[tokio::test]
async fn wrapped_composite_finishes_after_its_sink() {
    setup_logging();

    let sink = Stage::sink(|_: u64| async {
        sleep(Duration::from_millis(50)).await;
        Ok::<(), BoxError>(())
    });
    let transform = Stage::map(|n: u64| n + 1);
    let composite = compose![transform.clone(), sink.clone()];
    assert_eq!(composite.kind(), StageKind::Facade);

    for n in 0..3 {
        composite.write(n).await.unwrap();
    }
    composite.end().unwrap();

    // The transform is done long before the sink consumed its records.
    transform.finished().await.unwrap();
    assert!(!sink.lifecycle().is_settled());
    assert!(!composite.lifecycle().is_settled());

    composite.finished().await.unwrap();
    assert!(sink.lifecycle().is_finished());
}

#[tokio::test]
async fn source_into_wrapped_segment() {
    setup_logging();

    let (sink, values) = collector();
    let segment = compose![Stage::map(|n: u64| n * 2), sink.clone()];
    let composed = compose![numbers(3), segment.clone()];
    assert!(composed.same_stage(&segment));

    timeout(Duration::from_secs(2), composed.finished())
        .await
        .expect("composite settles")
        .unwrap();
    assert!(sink.lifecycle().is_finished());
    assert_eq!(*values.lock().unwrap(), vec![2, 4, 6]);
}

#[tokio::test]
async fn writes_pass_through_wrapped_composite() {
    setup_logging();

    let config = StageConfig::default().with_buffer_size(2);
    let composite = compose_pipeline_with(
        &config,
        [Stage::map(|n: u64| n * 2), Stage::map(|n: u64| n + 1)],
    );

    let ((), (values, err)) = tokio::join!(
        async {
            for n in 0..100 {
                composite.write(n).await.unwrap();
            }
            composite.end().unwrap();
        },
        drain(&composite)
    );
    assert!(err.is_none());
    assert_eq!(values, (0..100).map(|n| n * 2 + 1).collect::<Vec<u64>>());
    composite.finished().await.unwrap();
}

#[tokio::test]
async fn failure_inside_wrapped_composite() {
    setup_logging();

    let picky = Stage::transform(|n: u64| async move {
        if n == 3 {
            return Err(BoxError::from("three is not allowed"));
        }
        Ok(n)
    });
    let composite = compose![Stage::map(|n: u64| n + 1), picky.clone()];

    let ((), (values, err)) = tokio::join!(
        async {
            for n in 0..5 {
                if composite.write(n).await.is_err() {
                    break;
                }
            }
            let _ = composite.end();
        },
        drain(&composite)
    );
    assert_eq!(values, vec![1, 2]);

    let err = err.unwrap();
    assert_eq!(err.to_string(), "three is not allowed");
    assert!(err.ptr_eq(&picky.finished().await.unwrap_err()));
    assert!(composite.finished().await.unwrap_err().ptr_eq(&err));
}

#[tokio::test]
async fn consumption_error_tears_down_chain() {
    setup_logging();

    let source = Stage::source(stream::iter(1..).map(Ok::<u64, BoxError>));
    let double = Stage::map(|n: u64| n * 2);
    let sink = Stage::sink(|n: u64| async move {
        if n > 10 {
            return Err(BoxError::from("storage full"));
        }
        Ok(())
    });
    let composed = compose![source.clone(), double.clone(), sink];

    let err = composed.finished().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consumption);

    let source_err = timeout(Duration::from_secs(1), source.finished())
        .await
        .expect("endless source is torn down")
        .unwrap_err();
    assert!(source_err.ptr_eq(&err));
    assert!(double.finished().await.unwrap_err().ptr_eq(&err));
}

#[tokio::test]
async fn destroying_linear_composite() {
    setup_logging();

    let source = Stage::source(stream::pending::<Result<u64, BoxError>>());
    let composed = compose![source.clone(), Stage::map(|n: u64| n)];

    let err = StageError::production("no longer needed");
    composed.destroy(err.clone());

    let (values, read_err) = drain(&composed).await;
    assert!(values.is_empty());
    assert!(read_err.unwrap().ptr_eq(&err));
    let source_err = timeout(Duration::from_secs(1), source.finished())
        .await
        .expect("source is torn down")
        .unwrap_err();
    assert!(source_err.ptr_eq(&err));
}

#[tokio::test]
async fn failure_settles_unread_chain() {
    setup_logging();

    let source = Stage::source(
        stream::iter((1..=40).map(Ok::<u64, BoxError>))
            .chain(stream::iter([Err(BoxError::from("boom"))])),
    );
    let composed = compose![source.clone(), Stage::map(|n: u64| n * 2)];

    // Nobody reads, more records were produced than the buffers hold.
    let err = timeout(Duration::from_secs(2), composed.finished())
        .await
        .expect("chain settles without a reader")
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(err.ptr_eq(&source.finished().await.unwrap_err()));

    // What was buffered stays readable, in order, followed by the error.
    let (values, read_err) = drain(&composed).await;
    assert!(!values.is_empty());
    let expected: Vec<u64> = (1..=values.len() as u64).map(|n| n * 2).collect();
    assert_eq!(values, expected);
    assert!(read_err.unwrap().ptr_eq(&err));
}

#[tokio::test]
async fn failure_settles_unread_wrapped_composite() {
    setup_logging();

    let picky = Stage::transform(|n: u64| async move {
        if n == 20 {
            return Err(BoxError::from("twenty"));
        }
        Ok(n)
    });
    let composite = compose![Stage::map(|n: u64| n), picky.clone()];

    let writer = composite.clone();
    tokio::spawn(async move {
        for n in 0..=20 {
            if writer.write(n).await.is_err() {
                break;
            }
        }
        let _ = writer.end();
    });

    let err = timeout(Duration::from_secs(2), composite.finished())
        .await
        .expect("facade settles without a reader")
        .unwrap_err();
    assert_eq!(err.to_string(), "twenty");
    assert!(err.ptr_eq(&picky.finished().await.unwrap_err()));

    let (values, read_err) = drain(&composite).await;
    assert!(!values.is_empty());
    let expected: Vec<u64> = (0..values.len() as u64).collect();
    assert_eq!(values, expected);
    assert!(read_err.unwrap().ptr_eq(&err));
}
