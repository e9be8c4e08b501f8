//! The arena that owns every IR entity.
//!
//! A [`Fusion`] hands out stable handles for iteration domains, transforms, tensors
//! and tensor ops. Entities are never removed, so a handle stays valid for the
//! lifetime of the fusion.
//!
//! Tensor ops always create fresh root dimensions for their outputs; how those relate
//! to the producer's dimensions is described by
//! [`pairwise_root_map`](crate::root_map::pairwise_root_map). Scheduling primitives
//! (`split`, `merge`, `swizzle`, ...) only rewrite a tensor's leaf domain.

use std::collections::HashSet;

use indexmap::IndexSet;
use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use crate::error::{
    AxisOutOfBoundsSnafu, BroadcastFlagsMismatchSnafu, EmptyInputsSnafu, EmptyOutputsSnafu, InvalidComputeAtSnafu,
    InvalidPermutationSnafu, NotAConsumerSnafu, RankMismatchSnafu, ReplayArityMismatchSnafu, Result,
    SwizzleAxesEqualSnafu, ZeroSplitFactorSnafu,
};
use crate::expr::{Expr, ExprKind};
use crate::extent::Extent;
use crate::iter_domain::IterDomain;
use crate::tensor::{TensorOp, TensorOpKind, TensorView};
use crate::types::{ExprId, IterDomainId, IterType, ParallelType, SwizzleMode, SwizzleType, TensorId, TensorOpId};

#[derive(Debug, Clone, Default)]
pub struct Fusion {
    ids: Vec<IterDomain>,
    exprs: Vec<Expr>,
    tensors: Vec<TensorView>,
    ops: Vec<TensorOp>,
}

impl Fusion {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn iter_domain(&self, id: IterDomainId) -> &IterDomain {
        &self.ids[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn tensor(&self, id: TensorId) -> &TensorView {
        &self.tensors[id.index()]
    }

    pub fn tensor_op(&self, id: TensorOpId) -> &TensorOp {
        &self.ops[id.index()]
    }

    pub fn iter_domains(&self) -> &[IterDomain] {
        &self.ids
    }

    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn tensors(&self) -> &[TensorView] {
        &self.tensors
    }

    pub fn tensor_ops(&self) -> &[TensorOp] {
        &self.ops
    }

    /// Handles of every tensor op in creation order.
    pub fn tensor_op_ids(&self) -> Vec<TensorOpId> {
        self.ops.iter().map(TensorOp::id).collect()
    }

    /// Transform that produced `id`, if any.
    pub fn definition(&self, id: IterDomainId) -> Option<&Expr> {
        self.iter_domain(id).definition.map(|expr| self.expr(expr))
    }

    /// Every tensor touched by `ops`, in first-seen order (inputs before outputs).
    pub fn tensors_of(&self, ops: &[TensorOpId]) -> Vec<TensorId> {
        let mut tensors = IndexSet::new();
        for op in ops.iter().map(|op| self.tensor_op(*op)) {
            tensors.extend(op.inputs.iter().copied());
            tensors.extend(op.outputs.iter().copied());
        }
        tensors.into_iter().collect()
    }

    /// Every iteration domain of `tv`: root, rfactor, leaf and everything in between.
    ///
    /// Root dimensions come first in domain order, the rest follow in creation order.
    pub fn all_ids_of(&self, tv: TensorId) -> Vec<IterDomainId> {
        let tensor = self.tensor(tv);
        let root: HashSet<IterDomainId> = tensor.root.iter().copied().collect();

        let mut found = HashSet::new();
        let mut stack: Vec<IterDomainId> = tensor.leaf.iter().chain(tensor.maybe_rfactor()).copied().collect();
        while let Some(id) = stack.pop() {
            if !found.insert(id) || root.contains(&id) {
                continue;
            }
            if let Some(def) = self.definition(id) {
                stack.extend(def.inputs.iter().copied());
                stack.extend(def.outputs.iter().copied());
            }
        }

        let mut rest: Vec<IterDomainId> = found.into_iter().filter(|id| !root.contains(id)).collect();
        rest.sort();
        tensor.root.iter().copied().chain(rest).collect()
    }

    // =========================================================================
    // Dimensions and transforms
    // =========================================================================

    /// Create a free-standing iteration domain.
    pub fn new_iter_domain(&mut self, extent: impl Into<Extent>, iter_type: IterType) -> IterDomainId {
        self.push_id(extent.into(), iter_type, false, None)
    }

    fn push_id(
        &mut self,
        extent: Extent,
        iter_type: IterType,
        is_rfactor_product: bool,
        definition: Option<ExprId>,
    ) -> IterDomainId {
        let id = IterDomainId::from_index(self.ids.len());
        self.ids.push(IterDomain {
            id,
            extent,
            iter_type,
            parallel_type: ParallelType::Serial,
            is_rfactor_product,
            definition,
        });
        id
    }

    fn push_expr(
        &mut self,
        kind: ExprKind,
        inputs: SmallVec<[IterDomainId; 2]>,
        outputs: SmallVec<[IterDomainId; 2]>,
    ) -> ExprId {
        let id = ExprId::from_index(self.exprs.len());
        tracing::trace!(expr.id = %id, kind = kind.name(), ?inputs, ?outputs, "created transform");
        self.exprs.push(Expr { id, kind, inputs, outputs });
        id
    }

    fn next_expr_id(&self) -> ExprId {
        ExprId::from_index(self.exprs.len())
    }

    /// Split `id` by `factor`, returning `(outer, inner)`.
    pub fn split_id(
        &mut self,
        id: IterDomainId,
        factor: impl Into<Extent>,
        inner_split: bool,
    ) -> Result<(IterDomainId, IterDomainId)> {
        self.split_id_impl(id, factor.into(), inner_split, false)
    }

    fn split_id_impl(
        &mut self,
        id: IterDomainId,
        factor: Extent,
        inner_split: bool,
        rfactor: bool,
    ) -> Result<(IterDomainId, IterDomainId)> {
        ensure!(!factor.is_zero(), ZeroSplitFactorSnafu { id });

        let input = self.iter_domain(id);
        let iter_type = input.iter_type;
        let remainder = input.extent.ceil_div(&factor);
        let (outer_extent, inner_extent) = if inner_split { (remainder, factor.clone()) } else { (factor.clone(), remainder) };

        let def = self.next_expr_id();
        let outer = self.push_id(outer_extent, iter_type, rfactor, Some(def));
        let inner = self.push_id(inner_extent, iter_type, rfactor, Some(def));
        self.push_expr(ExprKind::Split { factor, inner_split }, smallvec![id], smallvec![outer, inner]);
        Ok((outer, inner))
    }

    /// Merge `outer` and `inner` into one dimension.
    pub fn merge_ids(&mut self, outer: IterDomainId, inner: IterDomainId) -> IterDomainId {
        self.merge_ids_impl(outer, inner, false)
    }

    fn merge_ids_impl(&mut self, outer: IterDomainId, inner: IterDomainId, rfactor: bool) -> IterDomainId {
        let (o, i) = (self.iter_domain(outer), self.iter_domain(inner));
        let extent = o.extent.mul(&i.extent);
        let iter_type = match (o.iter_type, i.iter_type) {
            (IterType::Broadcast, IterType::Broadcast) => IterType::Broadcast,
            (IterType::Reduction, _) | (_, IterType::Reduction) => IterType::Reduction,
            _ => IterType::Iteration,
        };

        let def = self.next_expr_id();
        let out = self.push_id(extent, iter_type, rfactor, Some(def));
        self.push_expr(ExprKind::Merge, smallvec![outer, inner], smallvec![out]);
        out
    }

    /// Swizzle the pair `(x, y)`, returning `(x', y')`.
    pub fn swizzle_ids(
        &mut self,
        x: IterDomainId,
        y: IterDomainId,
        swizzle_type: SwizzleType,
        mode: SwizzleMode,
    ) -> (IterDomainId, IterDomainId) {
        let (in_x, in_y) = (self.iter_domain(x).clone(), self.iter_domain(y).clone());

        let def = self.next_expr_id();
        let out_x = self.push_id(in_x.extent, in_x.iter_type, false, Some(def));
        let out_y = self.push_id(in_y.extent, in_y.iter_type, false, Some(def));
        self.push_expr(ExprKind::Swizzle2D { swizzle_type, mode }, smallvec![x, y], smallvec![out_x, out_y]);
        (out_x, out_y)
    }

    /// Apply the transform `expr` to `new_inputs`, producing fresh outputs.
    ///
    /// The replay belongs to no tensor, so graphs built over tensors never see it
    /// unless it is registered explicitly.
    pub fn replay_expr(&mut self, expr: ExprId, new_inputs: &[IterDomainId]) -> Result<ExprId> {
        let source = self.expr(expr);
        ensure!(
            source.inputs.len() == new_inputs.len(),
            ReplayArityMismatchSnafu { expr, expected: source.inputs.len(), actual: new_inputs.len() }
        );

        let replay = self.next_expr_id();
        match source.kind.clone() {
            ExprKind::Split { factor, inner_split } => {
                self.split_id_impl(new_inputs[0], factor, inner_split, false)?;
            }
            ExprKind::Merge => {
                self.merge_ids(new_inputs[0], new_inputs[1]);
            }
            ExprKind::Swizzle2D { swizzle_type, mode } => {
                self.swizzle_ids(new_inputs[0], new_inputs[1], swizzle_type, mode);
            }
        }
        tracing::debug!(%expr, %replay, ?new_inputs, "replayed transform");
        Ok(replay)
    }

    // =========================================================================
    // Tensors and tensor ops
    // =========================================================================

    /// Create an input tensor with iteration dimensions of the given extents.
    pub fn add_tensor<E: Into<Extent>>(&mut self, name: impl Into<String>, extents: impl IntoIterator<Item = E>) -> TensorId {
        self.add_tensor_with(name, extents.into_iter().map(|extent| (extent.into(), IterType::Iteration)))
    }

    /// Create an input tensor with explicit iteration types.
    pub fn add_tensor_with(
        &mut self,
        name: impl Into<String>,
        dims: impl IntoIterator<Item = (Extent, IterType)>,
    ) -> TensorId {
        let root = dims.into_iter().map(|(extent, iter_type)| self.push_id(extent, iter_type, false, None)).collect();
        self.push_tensor(name.into(), root, None)
    }

    fn push_tensor(&mut self, name: String, root: Vec<IterDomainId>, rfactor: Option<Vec<IterDomainId>>) -> TensorId {
        let id = TensorId::from_index(self.tensors.len());
        let leaf = rfactor.clone().unwrap_or_else(|| root.clone());
        let view_like_rfactor = rfactor.is_some();
        self.tensors.push(TensorView { id, name, root, rfactor, view_like_rfactor, leaf, compute_at: 0, compute_with: None });
        id
    }

    fn push_op(
        &mut self,
        kind: TensorOpKind,
        inputs: SmallVec<[TensorId; 2]>,
        outputs: SmallVec<[TensorId; 1]>,
    ) -> TensorOpId {
        let id = TensorOpId::from_index(self.ops.len());
        self.ops.push(TensorOp { id, kind, inputs, outputs });
        id
    }

    /// Producer dimensions visible to a consumer: the maybe-rfactor domain without
    /// reduction dimensions.
    pub fn producer_dims(&self, tv: TensorId) -> Vec<IterDomainId> {
        self.tensor(tv).maybe_rfactor().iter().copied().filter(|id| !self.iter_domain(*id).is_reduction()).collect()
    }

    fn fresh_copy(&mut self, id: IterDomainId) -> IterDomainId {
        let source = self.iter_domain(id);
        let (extent, iter_type) = (source.extent.clone(), source.iter_type);
        self.push_id(extent, iter_type, false, None)
    }

    /// Elementwise op with a single output.
    pub fn unary(&mut self, input: TensorId, name: impl Into<String>) -> TensorId {
        let root = self.producer_dims(input).into_iter().map(|id| self.fresh_copy(id)).collect();
        let out = self.push_tensor(name.into(), root, None);
        self.push_op(TensorOpKind::Unary, smallvec![input], smallvec![out]);
        out
    }

    /// Elementwise op producing `count` sibling outputs.
    pub fn multi_output(&mut self, input: TensorId, count: usize, name: impl Into<String>) -> Vec<TensorId> {
        let name = name.into();
        let dims = self.producer_dims(input);
        let outputs: SmallVec<[TensorId; 1]> = (0..count)
            .map(|i| {
                let root = dims.iter().map(|id| self.fresh_copy(*id)).collect();
                self.push_tensor(format!("{name}{i}"), root, None)
            })
            .collect();
        self.push_op(TensorOpKind::Unary, smallvec![input], outputs.clone());
        outputs.into_vec()
    }

    /// Elementwise op over operands of equal rank; broadcast dimensions are resolved
    /// against their non-broadcast counterparts.
    pub fn binary(&mut self, lhs: TensorId, rhs: TensorId, name: impl Into<String>) -> Result<TensorId> {
        let (lhs_dims, rhs_dims) = (self.producer_dims(lhs), self.producer_dims(rhs));
        ensure!(
            lhs_dims.len() == rhs_dims.len(),
            RankMismatchSnafu { producer: rhs, producer_rank: rhs_dims.len(), consumer: lhs, consumer_rank: lhs_dims.len() }
        );

        let root = lhs_dims
            .iter()
            .zip(&rhs_dims)
            .map(|(l, r)| {
                let resolved = if self.iter_domain(*l).is_broadcast() { *r } else { *l };
                self.fresh_copy(resolved)
            })
            .collect();
        let out = self.push_tensor(name.into(), root, None);
        self.push_op(TensorOpKind::Binary, smallvec![lhs, rhs], smallvec![out]);
        Ok(out)
    }

    /// Insert broadcast dimensions wherever `is_new` is `true`.
    pub fn broadcast(&mut self, input: TensorId, is_new: &[bool], name: impl Into<String>) -> Result<TensorId> {
        let dims = self.producer_dims(input);
        let kept = is_new.iter().filter(|new| !**new).count();
        ensure!(kept == dims.len(), BroadcastFlagsMismatchSnafu { tensor: input, expected: dims.len(), actual: kept });

        let mut producer = dims.into_iter();
        let mut root = Vec::with_capacity(is_new.len());
        for new in is_new {
            let source = if *new { None } else { producer.next() };
            let id = match source {
                Some(source) => self.fresh_copy(source),
                None => self.push_id(Extent::Const(1), IterType::Broadcast, false, None),
            };
            root.push(id);
        }
        let out = self.push_tensor(name.into(), root, None);
        self.push_op(TensorOpKind::Broadcast { is_new: is_new.to_vec() }, smallvec![input], smallvec![out]);
        Ok(out)
    }

    /// Reduce `axes`; the output keeps them as reduction dimensions.
    pub fn reduction(&mut self, input: TensorId, axes: &[usize], name: impl Into<String>) -> Result<TensorId> {
        let dims = self.producer_dims(input);
        if let Some(axis) = axes.iter().find(|axis| **axis >= dims.len()) {
            return AxisOutOfBoundsSnafu { tensor: input, axis: *axis, rank: dims.len() }.fail();
        }

        let root = dims
            .iter()
            .enumerate()
            .map(|(pos, id)| {
                let extent = self.iter_domain(*id).extent.clone();
                let iter_type = if axes.contains(&pos) { IterType::Reduction } else { self.iter_domain(*id).iter_type };
                self.push_id(extent, iter_type, false, None)
            })
            .collect();
        let out = self.push_tensor(name.into(), root, None);
        self.push_op(TensorOpKind::Reduction { axes: axes.to_vec() }, smallvec![input], smallvec![out]);
        Ok(out)
    }

    /// Transpose: output dimension `i` is producer dimension `new2old[i]`.
    pub fn permute(&mut self, input: TensorId, new2old: &[usize], name: impl Into<String>) -> Result<TensorId> {
        let dims = self.producer_dims(input);
        let mut seen = vec![false; dims.len()];
        let valid = new2old.len() == dims.len()
            && new2old.iter().all(|old| *old < dims.len() && !std::mem::replace(&mut seen[*old], true));
        ensure!(valid, InvalidPermutationSnafu { tensor: input, permutation: new2old.to_vec(), rank: dims.len() });

        let root = new2old.iter().map(|old| self.fresh_copy(dims[*old])).collect();
        let out = self.push_tensor(name.into(), root, None);
        self.push_op(TensorOpKind::Permute { new2old: new2old.to_vec() }, smallvec![input], smallvec![out]);
        Ok(out)
    }

    /// Reshape that fuses dimensions `axis` and `axis + 1`.
    ///
    /// The output's root domain mirrors the producer; its rfactor domain holds the
    /// merged dimension, marked as an rfactor product.
    pub fn view_merge(&mut self, input: TensorId, axis: usize, name: impl Into<String>) -> Result<TensorId> {
        let dims = self.producer_dims(input);
        ensure!(axis + 1 < dims.len(), AxisOutOfBoundsSnafu { tensor: input, axis: axis + 1, rank: dims.len() });

        let root: Vec<IterDomainId> = dims.iter().map(|id| self.fresh_copy(*id)).collect();
        let merged = self.merge_ids_impl(root[axis], root[axis + 1], true);
        let mut rfactor = root.clone();
        rfactor.remove(axis + 1);
        rfactor[axis] = merged;

        let out = self.push_tensor(name.into(), root, Some(rfactor));
        self.push_op(TensorOpKind::View, smallvec![input], smallvec![out]);
        Ok(out)
    }

    /// Generic tensor op over pre-built outputs, for kinds without a dedicated helper.
    pub fn add_tensor_op(
        &mut self,
        kind: TensorOpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<TensorOpId> {
        ensure!(!inputs.is_empty(), EmptyInputsSnafu);
        ensure!(!outputs.is_empty(), EmptyOutputsSnafu);
        Ok(self.push_op(kind, inputs.iter().copied().collect(), outputs.iter().copied().collect()))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn leaf_axis(&self, tv: TensorId, axis: usize) -> Result<IterDomainId> {
        let leaf = &self.tensor(tv).leaf;
        leaf.get(axis).copied().ok_or_else(|| AxisOutOfBoundsSnafu { tensor: tv, axis, rank: leaf.len() }.build())
    }

    /// Split leaf `axis` of `tv`; the outer part stays at `axis`, the inner moves to `axis + 1`.
    pub fn split(&mut self, tv: TensorId, axis: usize, factor: impl Into<Extent>, inner_split: bool) -> Result<()> {
        let id = self.leaf_axis(tv, axis)?;
        let (outer, inner) = self.split_id(id, factor, inner_split)?;
        let leaf = &mut self.tensors[tv.index()].leaf;
        leaf[axis] = outer;
        leaf.insert(axis + 1, inner);
        Ok(())
    }

    /// Merge leaf axes `axis` (outer) and `axis + 1` (inner) of `tv`.
    pub fn merge(&mut self, tv: TensorId, axis: usize) -> Result<()> {
        let outer = self.leaf_axis(tv, axis)?;
        let inner = self.leaf_axis(tv, axis + 1)?;
        let out = self.merge_ids(outer, inner);
        let leaf = &mut self.tensors[tv.index()].leaf;
        leaf.remove(axis + 1);
        leaf[axis] = out;
        Ok(())
    }

    /// Swizzle leaf axes `x` and `y` of `tv` in place.
    pub fn swizzle(
        &mut self,
        tv: TensorId,
        swizzle_type: SwizzleType,
        mode: SwizzleMode,
        x: usize,
        y: usize,
    ) -> Result<()> {
        ensure!(x != y, SwizzleAxesEqualSnafu { tensor: tv, axis: x });
        let (in_x, in_y) = (self.leaf_axis(tv, x)?, self.leaf_axis(tv, y)?);
        let (out_x, out_y) = self.swizzle_ids(in_x, in_y, swizzle_type, mode);
        let leaf = &mut self.tensors[tv.index()].leaf;
        leaf[x] = out_x;
        leaf[y] = out_y;
        Ok(())
    }

    /// Bind leaf `axis` of `tv` to `parallel_type`.
    pub fn parallelize(&mut self, tv: TensorId, axis: usize, parallel_type: ParallelType) -> Result<()> {
        let id = self.leaf_axis(tv, axis)?;
        self.ids[id.index()].parallel_type = parallel_type;
        Ok(())
    }

    /// Share the first `position` leaf loops of `tv` with its consumers.
    pub fn compute_at(&mut self, tv: TensorId, position: usize) -> Result<()> {
        let rank = self.tensor(tv).leaf.len();
        ensure!(position <= rank, InvalidComputeAtSnafu { tensor: tv, position, rank });
        self.tensors[tv.index()].compute_at = position;
        Ok(())
    }

    /// Share the first `position` leaf loops of `tv` with `consumer` only.
    pub fn compute_with(&mut self, tv: TensorId, consumer: TensorId, position: usize) -> Result<()> {
        let rank = self.tensor(tv).leaf.len();
        ensure!(position <= rank, InvalidComputeAtSnafu { tensor: tv, position, rank });
        let consumes = self.ops.iter().any(|op| op.inputs.contains(&tv) && op.outputs.contains(&consumer));
        ensure!(consumes, NotAConsumerSnafu { producer: tv, consumer });
        self.tensors[tv.index()].compute_with = Some((consumer, position));
        Ok(())
    }
}
