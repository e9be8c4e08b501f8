//! Dimension transforms.
//!
//! An [`Expr`] consumes and produces iteration domains. Inputs and outputs are stored
//! positionally so that two transforms of the same kind can be compared slot by slot:
//!
//! | Kind        | Inputs         | Outputs          |
//! |-------------|----------------|------------------|
//! | `Split`     | `[in]`         | `[outer, inner]` |
//! | `Merge`     | `[outer, inner]` | `[out]`        |
//! | `Swizzle2D` | `[x, y]`       | `[x', y']`       |

use std::fmt;

use smallvec::SmallVec;

use crate::extent::Extent;
use crate::types::{ExprId, IterDomainId, SwizzleMode, SwizzleType};

/// Transform kind together with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// Split one dimension into two.
    ///
    /// With `inner_split` the factor is the extent of the inner output, otherwise it is
    /// the extent of the outer output.
    Split { factor: Extent, inner_split: bool },
    /// Fuse two dimensions into one.
    Merge,
    /// Permute the iteration order of a 2D tile.
    Swizzle2D { swizzle_type: SwizzleType, mode: SwizzleMode },
}

impl ExprKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Split { .. } => "split",
            Self::Merge => "merge",
            Self::Swizzle2D { .. } => "swizzle2d",
        }
    }

    /// Swizzle that only affects loop order.
    pub fn is_loop_swizzle(&self) -> bool {
        matches!(self, Self::Swizzle2D { mode: SwizzleMode::Loop, .. })
    }
}

/// A dimension transform owned by a [`Fusion`](crate::Fusion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub(crate) id: ExprId,
    pub(crate) kind: ExprKind,
    pub(crate) inputs: SmallVec<[IterDomainId; 2]>,
    pub(crate) outputs: SmallVec<[IterDomainId; 2]>,
}

impl Expr {
    pub fn id(&self) -> ExprId {
        self.id
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[IterDomainId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[IterDomainId] {
        &self.outputs
    }

    pub fn is_split(&self) -> bool {
        matches!(self.kind, ExprKind::Split { .. })
    }

    pub fn is_merge(&self) -> bool {
        matches!(self.kind, ExprKind::Merge)
    }

    pub fn is_swizzle(&self) -> bool {
        matches!(self.kind, ExprKind::Swizzle2D { .. })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[IterDomainId]| ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        match &self.kind {
            ExprKind::Split { factor, inner_split } => write!(
                f,
                "{} = split({}, {factor}, {})",
                join(&self.outputs),
                join(&self.inputs),
                if *inner_split { "inner" } else { "outer" }
            ),
            ExprKind::Merge => write!(f, "{} = merge({})", join(&self.outputs), join(&self.inputs)),
            ExprKind::Swizzle2D { swizzle_type, mode } => {
                write!(f, "{} = swizzle2d({}, {swizzle_type}, {mode})", join(&self.outputs), join(&self.inputs))
            }
        }
    }
}
