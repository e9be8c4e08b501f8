use snafu::Snafu;

use crate::types::{ExprId, IterDomainId, TensorId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Scheduling axis does not exist in the tensor's leaf domain.
    #[snafu(display("axis {axis} is out of bounds for {tensor} with {rank} leaf dimensions"))]
    AxisOutOfBounds { tensor: TensorId, axis: usize, rank: usize },

    /// Split by a zero factor.
    #[snafu(display("cannot split {id} by a zero factor"))]
    ZeroSplitFactor { id: IterDomainId },

    /// Compute-at position past the end of the leaf domain.
    #[snafu(display("compute-at position {position} is invalid for {tensor} with {rank} leaf dimensions"))]
    InvalidComputeAt { tensor: TensorId, position: usize, rank: usize },

    /// Both swizzle operands refer to the same axis.
    #[snafu(display("swizzle of {tensor} needs two distinct axes, got {axis} twice"))]
    SwizzleAxesEqual { tensor: TensorId, axis: usize },

    /// Producer and consumer domains cannot be paired up.
    #[snafu(display("rank mismatch between {producer} ({producer_rank} dims) and {consumer} ({consumer_rank} dims)"))]
    RankMismatch { producer: TensorId, producer_rank: usize, consumer: TensorId, consumer_rank: usize },

    /// Broadcast flags do not cover the output rank.
    #[snafu(display("broadcast of {tensor} expects {expected} non-new dimensions, got {actual}"))]
    BroadcastFlagsMismatch { tensor: TensorId, expected: usize, actual: usize },

    /// Permutation is not a permutation of `0..rank`.
    #[snafu(display("invalid permutation {permutation:?} for {tensor} of rank {rank}"))]
    InvalidPermutation { tensor: TensorId, permutation: Vec<usize>, rank: usize },

    /// Tensor op was given no inputs.
    #[snafu(display("tensor op requires at least one input"))]
    EmptyInputs,

    /// Tensor op was given no outputs.
    #[snafu(display("tensor op requires at least one output"))]
    EmptyOutputs,

    /// Compute-with target does not consume the tensor.
    #[snafu(display("{consumer} does not consume {producer}"))]
    NotAConsumer { producer: TensorId, consumer: TensorId },

    /// Replay was given a different number of inputs than the transform takes.
    #[snafu(display("{expr} takes {expected} inputs, replay was given {actual}"))]
    ReplayArityMismatch { expr: ExprId, expected: usize, actual: usize },
}
