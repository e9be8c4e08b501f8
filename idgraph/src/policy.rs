//! Per-mode merge rules.
//!
//! Every mode graph is the same [`IdGraph`]; what differs is where it starts and which
//! extra dimension pairs get mapped on top. Each [`MappingPolicy`] captures one mode's
//! rule, and the builder runs them in [`POLICIES`] order so that every mode can start
//! from the finished graph of the one before it.

use indexmap::IndexSet;
use itertools::Itertools;
use snafu::ResultExt;

use kiln_ir::{ExprId, Fusion, IterDomainId, TensorId, TensorOpId, TensorView, pairwise_root_map};

use crate::config::IdGraphConfig;
use crate::error::{IrSnafu, Result};
use crate::id_graph::{IdExprMap, IdGraph};
use crate::mode::IdMappingMode;

/// Everything a policy may read while building its graph.
pub struct BuildContext<'a, 'f> {
    pub fusion: &'f Fusion,
    pub ops: &'a [TensorOpId],
    pub tensors: &'a [TensorId],
    pub id_definitions: &'a IdExprMap,
    pub id_uses: &'a IdExprMap,
    pub config: &'a IdGraphConfig,
    /// Graphs finished so far, in build order.
    pub built: &'a [IdGraph<'f>],
}

impl<'f> BuildContext<'_, 'f> {
    pub fn graph(&self, mode: IdMappingMode) -> Option<&IdGraph<'f>> {
        self.built.iter().find(|graph| graph.mode() == mode)
    }

    /// Graph with a singleton group for every known dimension.
    pub fn singletons(&self, mode: IdMappingMode) -> IdGraph<'f> {
        let mut graph = IdGraph::new(self.fusion, mode, self.config.propagation_limit);
        for (id, definitions) in self.id_definitions {
            let uses = self.id_uses.get(id).cloned().unwrap_or_default();
            graph.initialize_id(*id, definitions.clone(), uses);
        }
        graph
    }

    /// `(producer, consumer)` root pairs of every producer/consumer pair of every op.
    pub fn root_pairs(&self) -> Result<Vec<(IterDomainId, IterDomainId)>> {
        let mut pairs = Vec::new();
        for op in self.ops.iter().map(|op| self.fusion.tensor_op(*op)) {
            for (producer, consumer) in op.inputs().iter().cartesian_product(op.outputs()) {
                pairs.extend(pairwise_root_map(self.fusion, op.id(), *producer, *consumer).context(IrSnafu)?);
            }
        }
        Ok(pairs)
    }

    /// Sibling outputs paired with the first output of their op, position by position
    /// over `domain`.
    pub fn sibling_pairs(
        &self,
        domain: impl Fn(TensorId) -> &'f [IterDomainId],
    ) -> Vec<(IterDomainId, IterDomainId)> {
        let mut pairs = Vec::new();
        for op in self.ops.iter().map(|op| self.fusion.tensor_op(*op)) {
            let Some((first, rest)) = op.outputs().split_first() else { continue };
            for sibling in rest {
                pairs.extend(domain(*first).iter().copied().zip(domain(*sibling).iter().copied()));
            }
        }
        pairs
    }
}

/// One mode's construction rule.
pub trait MappingPolicy: Sync {
    fn mode(&self) -> IdMappingMode;

    /// Mode whose finished graph this one copies as its starting point.
    fn base(&self) -> Option<IdMappingMode>;

    fn seed<'f>(&self, ctx: &BuildContext<'_, 'f>) -> IdGraph<'f> {
        match self.base().and_then(|base| ctx.graph(base)) {
            Some(base) => base.derive(self.mode()),
            None => ctx.singletons(self.mode()),
        }
    }

    /// Map this mode's extra pairs into `graph`.
    fn extend<'f>(&self, ctx: &BuildContext<'_, 'f>, graph: &mut IdGraph<'f>) -> Result<()>;

    /// Seed, then extend.
    fn build<'f>(&self, ctx: &BuildContext<'_, 'f>) -> Result<IdGraph<'f>> {
        let mut graph = self.seed(ctx);
        self.extend(ctx, &mut graph)?;
        Ok(graph)
    }
}

/// Build order. Each policy's base precedes it.
pub static POLICIES: [&dyn MappingPolicy; 4] = [&ExactPolicy, &AlmostExactPolicy, &PermissivePolicy, &LoopPolicy];

// ============================================================================
// EXACT
// ============================================================================

/// Producer and consumer root dimensions that index the same elements; broadcast
/// dimensions only map to broadcast dimensions.
pub struct ExactPolicy;

impl MappingPolicy for ExactPolicy {
    fn mode(&self) -> IdMappingMode {
        IdMappingMode::Exact
    }

    fn base(&self) -> Option<IdMappingMode> {
        None
    }

    fn extend<'f>(&self, ctx: &BuildContext<'_, 'f>, graph: &mut IdGraph<'f>) -> Result<()> {
        let fusion = ctx.fusion;
        for (a, b) in ctx.sibling_pairs(|tv| fusion.tensor(tv).root()) {
            graph.map_ids(a, b)?;
        }
        for (producer, consumer) in ctx.root_pairs()? {
            if fusion.iter_domain(producer).is_broadcast() == fusion.iter_domain(consumer).is_broadcast() {
                graph.map_ids(producer, consumer)?;
            }
        }
        graph.map_through_loop_swizzles()
    }
}

// ============================================================================
// ALMOST_EXACT
// ============================================================================

/// EXACT plus transforms that do not change the index space.
pub struct AlmostExactPolicy;

impl MappingPolicy for AlmostExactPolicy {
    fn mode(&self) -> IdMappingMode {
        IdMappingMode::AlmostExact
    }

    fn base(&self) -> Option<IdMappingMode> {
        Some(IdMappingMode::Exact)
    }

    fn extend<'f>(&self, ctx: &BuildContext<'_, 'f>, graph: &mut IdGraph<'f>) -> Result<()> {
        let representatives: Vec<ExprId> =
            graph.expr_groups().iter().filter_map(|group| graph.expr_members(*group).first().copied()).collect();
        for expr in representatives {
            for (a, b) in IdGraph::is_trivial_expr(ctx.fusion, ctx.fusion.expr(expr)) {
                graph.map_ids(a, b)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// PERMISSIVE
// ============================================================================

/// ALMOST_EXACT plus broadcast dimensions mapped to what they are broadcast against.
pub struct PermissivePolicy;

impl MappingPolicy for PermissivePolicy {
    fn mode(&self) -> IdMappingMode {
        IdMappingMode::Permissive
    }

    fn base(&self) -> Option<IdMappingMode> {
        Some(IdMappingMode::AlmostExact)
    }

    fn extend<'f>(&self, ctx: &BuildContext<'_, 'f>, graph: &mut IdGraph<'f>) -> Result<()> {
        let fusion = ctx.fusion;
        for (producer, consumer) in ctx.root_pairs()? {
            graph.map_ids(producer, consumer)?;
        }

        // A merge with a broadcast operand iterates like its other operand.
        let forwarded: Vec<(IterDomainId, IterDomainId)> = graph
            .expr_sets()
            .entries()
            .map(|expr| fusion.expr(*expr))
            .filter(|expr| expr.is_merge())
            .filter_map(|merge| {
                let (outer, inner) = (merge.inputs()[0], merge.inputs()[1]);
                match (fusion.iter_domain(outer).is_broadcast(), fusion.iter_domain(inner).is_broadcast()) {
                    (true, false) => Some((inner, merge.outputs()[0])),
                    (false, true) => Some((outer, merge.outputs()[0])),
                    _ => None,
                }
            })
            .collect();
        for (input, output) in forwarded {
            graph.map_ids(input, output)?;
        }

        graph.map_through_loop_swizzles()
    }
}

// ============================================================================
// LOOP
// ============================================================================

/// Leaf dimensions sharing a generated loop: producer leaves left of the compute-at
/// position join the consumer leaf they are PERMISSIVE-mapped to.
pub struct LoopPolicy;

impl LoopPolicy {
    /// Leaf dimensions of every tensor plus the inputs of loop swizzles producing them.
    fn members(ctx: &BuildContext<'_, '_>) -> IndexSet<IterDomainId> {
        let mut members = IndexSet::new();
        for tv in ctx.tensors.iter().map(|tv| ctx.fusion.tensor(*tv)) {
            for leaf in tv.leaf() {
                members.insert(*leaf);
                if let Some(def) = ctx.fusion.definition(*leaf)
                    && def.kind().is_loop_swizzle()
                {
                    members.extend(def.inputs().iter().copied());
                }
            }
        }
        members
    }
}

impl MappingPolicy for LoopPolicy {
    fn mode(&self) -> IdMappingMode {
        IdMappingMode::Loop
    }

    fn base(&self) -> Option<IdMappingMode> {
        None
    }

    fn seed<'f>(&self, ctx: &BuildContext<'_, 'f>) -> IdGraph<'f> {
        let members = Self::members(ctx);
        let inside = |expr: &ExprId| {
            let expr = ctx.fusion.expr(*expr);
            expr.inputs().iter().chain(expr.outputs()).all(|id| members.contains(id))
        };
        let filtered = |map: &IdExprMap, id: &IterDomainId| -> IndexSet<ExprId> {
            map.get(id).map(|exprs| exprs.iter().copied().filter(|e| inside(e)).collect()).unwrap_or_default()
        };

        let mut graph = IdGraph::new(ctx.fusion, IdMappingMode::Loop, ctx.config.propagation_limit);
        for id in &members {
            graph.initialize_id(*id, filtered(ctx.id_definitions, id), filtered(ctx.id_uses, id));
        }
        graph
    }

    fn extend<'f>(&self, ctx: &BuildContext<'_, 'f>, graph: &mut IdGraph<'f>) -> Result<()> {
        let Some(permissive) = ctx.graph(IdMappingMode::Permissive) else {
            return graph.map_through_loop_swizzles();
        };
        let fusion = ctx.fusion;

        for op in ctx.ops.iter().map(|op| fusion.tensor_op(*op)) {
            for (producer, consumer) in op.inputs().iter().cartesian_product(op.outputs()) {
                let (producer, consumer) = (fusion.tensor(*producer), fusion.tensor(*consumer));
                for (p, c) in shared_loop_pairs(permissive, producer, consumer, producer.compute_at()) {
                    graph.map_ids(p, c)?;
                }
            }
        }

        for (a, b) in ctx.sibling_pairs(|tv| fusion.tensor(tv).leaf()) {
            if permissive.are_mapped(a, b) {
                graph.map_ids(a, b)?;
            }
        }

        graph.map_through_loop_swizzles()
    }
}

/// Producer leaves left of `position`, each paired with the first consumer leaf it is
/// PERMISSIVE-mapped to. Leaves without a counterpart are dropped.
pub fn shared_loop_pairs(
    permissive: &IdGraph<'_>,
    producer: &TensorView,
    consumer: &TensorView,
    position: usize,
) -> Vec<(IterDomainId, IterDomainId)> {
    producer
        .leaf()
        .iter()
        .take(position)
        .filter_map(|p| consumer.leaf().iter().find(|c| permissive.are_mapped(*p, **c)).map(|c| (*p, *c)))
        .collect()
}
