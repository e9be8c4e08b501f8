//! Multi-mode iteration-domain equivalence graphs.
//!
//! Given a fusion and a list of tensor ops, [`IterDomainGraphs::build`] clusters the
//! iteration domains of every tensor into equivalence groups under four notions of
//! sameness ([`IdMappingMode`]), along with the transforms connecting them. Later
//! scheduling stages query the graphs to decide which dimensions share a loop, which
//! are provably the same size, and which dimension represents a loop.
//!
//! # Module Organization
//!
//! - [`disjoint_set`] - Union-find registry with enumerable members
//! - [`id_graph`] - One mode graph: groups, definitions/uses, propagation
//! - [`policy`] - Per-mode construction rules
//! - [`builder`] - Builds every mode graph and checks self-mapping
//! - [`traversal`] - Topological walk and statement sorting
//! - [`path`] - Minimal transform paths between dimension groups
//! - [`config`] - Construction configuration
//! - [`error`] - Error types and result handling
//!
//! # Example
//!
//! ```rust
//! use kiln_idgraph::{IdGraphConfig, IdMappingMode, IterDomainGraphs};
//! use kiln_ir::Fusion;
//!
//! let mut fusion = Fusion::new();
//! let t0 = fusion.add_tensor("T0", [8usize, 4]);
//! let t1 = fusion.unary(t0, "T1");
//! fusion.merge(t1, 0).unwrap();
//!
//! let graphs = IterDomainGraphs::build(&fusion, &fusion.tensor_op_ids(), &[], IdGraphConfig::default()).unwrap();
//! let (p, c) = (fusion.tensor(t0).root()[0], fusion.tensor(t1).root()[0]);
//! assert!(graphs.are_mapped(p, c, IdMappingMode::Exact));
//! ```

pub mod builder;
pub mod config;
pub mod disjoint_set;
pub mod error;
pub mod id_graph;
pub mod mode;
pub mod path;
pub mod policy;
pub mod traversal;


pub use builder::{IterDomainGraphs, SelfMapping};
pub use config::IdGraphConfig;
pub use disjoint_set::{DisjointSets, SetId};
pub use error::{DomainKind, Error, Result};
pub use id_graph::{ExprGroup, ExprGroups, IdGraph, IdGroup, IdGroups};
pub use mode::IdMappingMode;
pub use policy::{BuildContext, MappingPolicy, POLICIES};
pub use traversal::{IdGraphStmtSort, IdGraphVisitor, traverse};
