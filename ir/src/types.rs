//! Fundamental IR type definitions.
//!
//! Entity handles, iteration types, parallel types and swizzle parameters.
//! Handles are plain indices into the [`Fusion`](crate::Fusion) arena, so they are
//! `Copy`, totally ordered by creation, and cheap to use as map keys.

use derive_more::Display;

/// Handle to an [`IterDomain`](crate::IterDomain) owned by a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("i{_0}")]
pub struct IterDomainId(pub(crate) u32);

/// Handle to a dimension transform ([`Expr`](crate::Expr)) owned by a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("e{_0}")]
pub struct ExprId(pub(crate) u32);

/// Handle to a [`TensorView`](crate::TensorView) owned by a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("T{_0}")]
pub struct TensorId(pub(crate) u32);

/// Handle to a tensor-level operation ([`TensorOp`](crate::TensorOp)) owned by a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("op{_0}")]
pub struct TensorOpId(pub(crate) u32);

macro_rules! impl_handle_index {
    ($($handle:ident),* $(,)?) => {
        $(
            impl $handle {
                /// Position of the entity in its arena.
                pub const fn index(self) -> usize {
                    self.0 as usize
                }

                pub(crate) fn from_index(index: usize) -> Self {
                    debug_assert!(index <= u32::MAX as usize, "fusion arena exceeds u32::MAX entries");
                    Self(index as u32)
                }
            }
        )*
    };
}

impl_handle_index!(IterDomainId, ExprId, TensorId, TensorOpId);

/// How a dimension is iterated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[derive(strum::EnumIter, strum::AsRefStr)]
pub enum IterType {
    /// Regular data-parallel iteration.
    #[default]
    #[display("i")]
    Iteration,
    /// Dimension reduced away by the defining tensor op.
    #[display("r")]
    Reduction,
    /// Size-1 (or expanded) dimension introduced by broadcasting.
    #[display("b")]
    Broadcast,
}

/// Hardware binding of a loop.
///
/// `Serial` is the absence of a binding; everything else is a "non-serial" annotation
/// that must be consistent across a loop group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[derive(strum::EnumIter, strum::EnumCount, strum::AsRefStr)]
pub enum ParallelType {
    #[default]
    #[display("S")]
    Serial,
    #[display("BIDx")]
    BIDx,
    #[display("BIDy")]
    BIDy,
    #[display("BIDz")]
    BIDz,
    #[display("TIDx")]
    TIDx,
    #[display("TIDy")]
    TIDy,
    #[display("TIDz")]
    TIDz,
    #[display("V")]
    Vectorize,
    #[display("UR")]
    Unroll,
    #[display("US")]
    Unswitch,
}

impl ParallelType {
    /// True for every binding other than [`ParallelType::Serial`].
    pub const fn is_parallel(&self) -> bool {
        !matches!(self, Self::Serial)
    }

    /// True for block and thread index bindings.
    pub const fn is_thread(&self) -> bool {
        matches!(self, Self::BIDx | Self::BIDy | Self::BIDz | Self::TIDx | Self::TIDy | Self::TIDz)
    }
}

/// Index permutation applied by a 2D swizzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SwizzleType {
    NoSwizzle,
    ZShape,
    Xor,
    CyclicShift,
}

/// What a 2D swizzle affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SwizzleMode {
    /// Swizzle is disabled; the transform is an identity.
    NoSwizzle,
    /// Swizzle changes the data layout and therefore indexing.
    Data,
    /// Swizzle only changes the loop traversal order.
    Loop,
}
