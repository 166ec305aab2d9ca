// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit capability descriptors for stages.
//!
//! Every stage is tagged with the set of capabilities it has at construction time. Composition
//! decides how to wire stages together by looking at this tag only, never at the concrete kind
//! of stage behind it.
use std::fmt;

/// Capability set of a stage, drawn from {Readable, Writable}.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    readable: bool,
    writable: bool,
}

impl Capabilities {
    /// Neither readable nor writable, for example a closed chain from a source into a sink.
    pub const NONE: Self = Self::new(false, false);

    /// Readable only.
    pub const SOURCE: Self = Self::new(true, false);

    /// Writable only.
    pub const SINK: Self = Self::new(false, true);

    /// Readable and writable: transforms, passthroughs and composite facades.
    pub const DUPLEX: Self = Self::new(true, true);

    pub const fn new(readable: bool, writable: bool) -> Self {
        Self { readable, writable }
    }

    /// Records can be read from this stage.
    pub const fn readable(&self) -> bool {
        self.readable
    }

    /// Records can be written into this stage.
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Returns the same set with the Writable capability removed.
    pub const fn without_writable(self) -> Self {
        Self::new(self.readable, false)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.readable, self.writable) {
            (true, true) => write!(f, "readable+writable"),
            (true, false) => write!(f, "readable"),
            (false, true) => write!(f, "writable"),
            (false, false) => write!(f, "none"),
        }
    }
}
