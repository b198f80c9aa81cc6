//! Phase orchestration.
//!
//! A lowering pipeline is an ordered list of phases. Each phase takes the
//! tree it is given and returns a transformed version of the same unit (the
//! same module, the same function, ...). Running a phase goes through three
//! collaborators:
//!
//!   1) the [`PhaseRegistry`] which knows every phase, their order, and which
//!      of them are enabled, verbose or dumped
//!   2) the [`PhaseManager`] which checks that the prerequisites of a phase
//!      have run in its scope or in one of its ancestors
//!   3) the [`PhaseRunner`] which dumps the tree around the phase and decides
//!      how the phase body is executed (timed or not)
//!
//! Nested units get child managers so per-function phases can require
//! per-module phases that ran in the parent scope.

use std::{collections::BTreeSet, sync::Arc};

use crate::{error::Result, index::simple_index};

mod manager;
mod registry;
mod runner;

pub use manager::PhaseManager;
pub use registry::{PhaseListing, PhaseRegistry, PhaseRegistryBuilder};
pub use runner::{
    DefaultPhaseRunner, DumpSink, FileSink, IrDump, MemorySink, PhaseContext, PhaseRunner,
    StdoutSink, VerboseScope,
};

simple_index! {
    /// Identifies a phase within its registry
    pub struct PhaseId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PhaseKind {
    Regular,
    /// Marks the start of a lowering process. Only ever dumped before.
    StartMarker,
    /// Marks the end of a lowering process. Only ever dumped after.
    EndMarker,
}

impl PhaseKind {
    pub fn is_marker(self) -> bool {
        !matches!(self, PhaseKind::Regular)
    }
}

/// Everything about a phase except its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDescriptor {
    pub id: PhaseId,
    pub name: String,
    pub description: String,
    pub kind: PhaseKind,
    pub prerequisites: BTreeSet<PhaseId>,
}

pub type PhaseBody<C, D> = Box<dyn Fn(&C, D) -> Result<D>>;

/// A registered phase bound to its body. `C` is the execution context handed
/// to the body and `D` the tree it transforms.
///
/// Bodies must return the same logical unit they were given. This is not
/// checked.
pub struct Phase<C, D> {
    descriptor: Arc<PhaseDescriptor>,
    body: PhaseBody<C, D>,
}

impl<C, D> Phase<C, D> {
    pub(crate) fn new(descriptor: Arc<PhaseDescriptor>, body: PhaseBody<C, D>) -> Self {
        Self { descriptor, body }
    }

    pub fn id(&self) -> PhaseId {
        self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    pub fn descriptor(&self) -> &PhaseDescriptor {
        &self.descriptor
    }

    pub fn invoke(&self, context: &C, input: D) -> Result<D> {
        (self.body)(context, input)
    }
}

impl<C, D> core::fmt::Debug for Phase<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
