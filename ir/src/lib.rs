//! Tensor-level IR for the Kiln fusion scheduler.
//!
//! This crate defines the entities that iteration-domain equivalence analysis runs on:
//! iteration domains, the transforms between them, tensors and tensor ops, all owned by
//! a single [`Fusion`] arena and referred to by copyable handles.
//!
//! # Module Organization
//!
//! - [`types`] - Handles and small enums (iteration, parallel and swizzle kinds)
//! - [`extent`] - Concrete and symbolic extents
//! - [`iter_domain`] - Iteration dimensions
//! - [`expr`] - Split, merge and swizzle transforms
//! - [`tensor`] - Tensors and tensor ops
//! - [`fusion`] - The arena, tensor-op constructors and scheduling primitives
//! - [`root_map`] - Producer-to-consumer root dimension pairing
//! - [`error`] - Error types and result handling

pub mod error;
pub mod expr;
pub mod extent;
pub mod fusion;
pub mod iter_domain;
pub mod prelude;
pub mod root_map;
pub mod tensor;
pub mod types;


pub use error::{Error, Result};
pub use expr::{Expr, ExprKind};
pub use extent::Extent;
pub use fusion::Fusion;
pub use iter_domain::IterDomain;
pub use root_map::pairwise_root_map;
pub use tensor::{TensorOp, TensorOpKind, TensorView};
pub use types::{ExprId, IterDomainId, IterType, ParallelType, SwizzleMode, SwizzleType, TensorId, TensorOpId};
