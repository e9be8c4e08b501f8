use snafu::Snafu;

use kiln_ir::{ExprId, IterDomainId, ParallelType, TensorId};

use crate::mode::IdMappingMode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Error from the underlying IR while walking tensor ops.
    #[snafu(display("IR error: {source}"))]
    Ir { source: kiln_ir::Error },

    /// Dimension was never registered in the mode graph.
    #[snafu(display("{id} is not part of the {mode} graph"))]
    IdNotInGraph { id: IterDomainId, mode: IdMappingMode },

    /// Mode graph was not built (LOOP can be disabled in the configuration).
    #[snafu(display("the {mode} graph was not built"))]
    ModeNotBuilt { mode: IdMappingMode },

    /// Transform was never registered in the mode graph.
    #[snafu(display("{expr} is not part of the {mode} graph"))]
    ExprNotInGraph { expr: ExprId, mode: IdMappingMode },

    /// One LOOP group carries two different non-serial parallel types.
    #[snafu(display("conflicting parallel types {first} and {second} in the LOOP group of {id}"))]
    ParallelTypeConflict { id: IterDomainId, first: ParallelType, second: ParallelType },

    /// Two dimensions of one tensor ended up in the same group.
    #[snafu(display("{tensor} has {first} and {second} mapped together in its {domain} domain under {mode}"))]
    SelfMapping {
        tensor: TensorId,
        first: IterDomainId,
        second: IterDomainId,
        domain: DomainKind,
        mode: IdMappingMode,
    },

    /// Traversal could not make progress; the graph has a cycle or an unreachable island.
    #[snafu(display("traversal stalled with {remaining} of {total} groups unvisited"))]
    TraversalStalled { remaining: usize, total: usize },

    /// Tensor has no compute-with consumer to share loops with.
    #[snafu(display("{tensor} has no resolved compute-with consumer"))]
    ComputeWithUnresolved { tensor: TensorId },

    /// A single mapping request exceeded the configured number of propagation steps.
    #[snafu(display("mapping {a} and {b} under {mode} exceeded {limit} propagation steps"))]
    PropagationLimitExceeded { a: IterDomainId, b: IterDomainId, mode: IdMappingMode, limit: usize },
}

/// Which domain of a tensor a self-mapping was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DomainKind {
    Root,
    Rfactor,
    Leaf,
}
