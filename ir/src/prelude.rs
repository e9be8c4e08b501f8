//! Common imports for building fusions:
//!
//! ```rust
//! use kiln_ir::prelude::*;
//! ```

pub use crate::{Extent, Fusion, pairwise_root_map};
pub use crate::{Expr, ExprKind, IterDomain, TensorOp, TensorOpKind, TensorView};
pub use crate::{ExprId, IterDomainId, TensorId, TensorOpId};
pub use crate::{IterType, ParallelType, SwizzleMode, SwizzleType};
