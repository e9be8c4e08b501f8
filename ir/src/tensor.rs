//! Tensors and the tensor-level operations connecting them.

use std::fmt;

use smallvec::SmallVec;

use crate::types::{IterDomainId, TensorId, TensorOpId};

/// A tensor and its domains.
///
/// - `root`: the dimensions the tensor is defined over.
/// - `rfactor`: optional logical domain derived from `root` (for example by a view).
/// - `leaf`: the scheduled domain that loops are generated from.
///
/// Leaf dimensions at positions `< compute_at` are shared with the consumer's loop nest.
/// A compute-with records one resolved consumer and the number of leading leaf loops
/// shared with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView {
    pub(crate) id: TensorId,
    pub(crate) name: String,
    pub(crate) root: Vec<IterDomainId>,
    pub(crate) rfactor: Option<Vec<IterDomainId>>,
    pub(crate) view_like_rfactor: bool,
    pub(crate) leaf: Vec<IterDomainId>,
    pub(crate) compute_at: usize,
    pub(crate) compute_with: Option<(TensorId, usize)>,
}

impl TensorView {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &[IterDomainId] {
        &self.root
    }

    pub fn rfactor(&self) -> Option<&[IterDomainId]> {
        self.rfactor.as_deref()
    }

    /// Rfactor domain if present, root domain otherwise.
    pub fn maybe_rfactor(&self) -> &[IterDomainId] {
        self.rfactor.as_deref().unwrap_or(&self.root)
    }

    pub fn has_rfactor(&self) -> bool {
        self.rfactor.is_some()
    }

    /// Rfactor domain was produced by a reshape rather than a reduction rfactor.
    pub fn has_view_like_rfactor(&self) -> bool {
        self.view_like_rfactor
    }

    pub fn leaf(&self) -> &[IterDomainId] {
        &self.leaf
    }

    pub fn compute_at(&self) -> usize {
        self.compute_at
    }

    /// Resolved compute-with consumer and position.
    pub fn compute_with(&self) -> Option<(TensorId, usize)> {
        self.compute_with
    }
}

impl fmt::Display for TensorView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[IterDomainId]| ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        write!(f, "{}[{}]", self.name, join(&self.leaf))?;
        if self.compute_at > 0 {
            write!(f, " ca({})", self.compute_at)?;
        }
        if let Some((consumer, position)) = self.compute_with {
            write!(f, " cw({consumer}, {position})")?;
        }
        Ok(())
    }
}

/// Kind of a tensor-level operation.
///
/// The kind decides how producer dimensions line up with consumer root dimensions,
/// see [`pairwise_root_map`](crate::root_map::pairwise_root_map).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TensorOpKind {
    /// Elementwise op with one input.
    Unary,
    /// Elementwise op with broadcasting between inputs.
    Binary,
    /// Insert broadcast dimensions at positions flagged `true`.
    Broadcast { is_new: Vec<bool> },
    /// Reduce the flagged dimensions; they stay in the output as reduction dimensions.
    Reduction { axes: Vec<usize> },
    /// Consumer root dimension `i` comes from producer dimension `new2old[i]`.
    Permute { new2old: Vec<usize> },
    /// Reshape expressed as a transform from the output's root to its rfactor domain.
    View,
}

/// An operation from producer tensors to consumer tensors.
///
/// Every output of one operation is a sibling of the others and shares its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorOp {
    pub(crate) id: TensorOpId,
    pub(crate) kind: TensorOpKind,
    pub(crate) inputs: SmallVec<[TensorId; 2]>,
    pub(crate) outputs: SmallVec<[TensorId; 1]>,
}

impl TensorOp {
    pub fn id(&self) -> TensorOpId {
        self.id
    }

    pub fn kind(&self) -> &TensorOpKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }
}
