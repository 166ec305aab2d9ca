// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composition of stages into a single stage.
//!
//! [`compose_pipeline`] looks at the number of stages and at the capabilities of the first one
//! to decide how to build the composite:
//!
//! | Stages                             | Result                                              |
//! |------------------------------------|-----------------------------------------------------|
//! | none                               | new identity passthrough                            |
//! | one                                | the very same stage                                 |
//! | two or more, first is not writable | terminal stage of a linear chain, see [`compose_linear`] |
//! | two or more, first is writable     | new facade around the chain, see [`wrap_reusable`]  |
//!
//! A writable first stage is taken as the sign that the caller builds a reusable segment which
//! itself has to accept writes, for example when a previously wrapped composite is re-embedded
//! as the head of a new chain. This is a best-effort guess and not a guarantee: a plain sink
//! placed first is wrapped as well.
mod linear;
mod wrap;

use std::iter;

use tracing::debug;

use crate::config::StageConfig;
use crate::stage::Stage;

pub use linear::compose_linear;
pub use wrap::wrap_reusable;

/// Composes `stages` into a single stage, using the default config for stages created on the
/// way.
pub fn compose_pipeline<T, I>(stages: I) -> Stage<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stage<T>>,
{
    compose_pipeline_with(&StageConfig::default(), stages)
}

/// Composes `stages` into a single stage, see the [module documentation](self).
///
/// `config` applies to the stages composition creates itself: the identity passthrough for an
/// empty list and the internal stages of a wrapped composite.
pub fn compose_pipeline_with<T, I>(config: &StageConfig, stages: I) -> Stage<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stage<T>>,
{
    let mut stages = stages.into_iter();
    let Some(head) = stages.next() else {
        debug!("no stages given, composing identity passthrough");
        return Stage::passthrough_with(config);
    };

    let rest: Vec<Stage<T>> = stages.collect();
    if rest.is_empty() {
        return head;
    }

    if head.capabilities().writable() {
        debug!(head = %head.id(), len = rest.len() + 1, "head is writable, wrapping chain");
        wrap_reusable(config, iter::once(head).chain(rest))
    } else {
        compose_linear(head, rest)
    }
}

/// Variadic form of [`compose_pipeline`].
///
/// ```ignore
/// let identity: Stage<u64> = compose![];
/// let same = compose![source.clone()];
/// let chain = compose![source, double, plus_one];
/// ```
#[macro_export]
macro_rules! compose {
    () => {
        $crate::compose_pipeline(::std::iter::empty())
    };
    ($($stage:expr),+ $(,)?) => {
        $crate::compose_pipeline([$($stage),+])
    };
}
