//! One equivalence graph over iteration domains and the transforms connecting them.
//!
//! An [`IdGraph`] keeps two partitions, one over dimensions and one over transforms,
//! plus, for every dimension group, the transform groups that define and use it.
//! Mapping two dimensions together propagates: transforms that consume (or produce)
//! both sides are compared structurally, and matching ones get their outputs (or
//! inputs) mapped as well, until nothing changes.

use std::collections::VecDeque;
use std::fmt;

use derive_more::Display;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use smallvec::SmallVec;
use snafu::OptionExt;

use kiln_ir::{Expr, ExprId, ExprKind, Fusion, IterDomainId, SwizzleMode, SwizzleType};

use crate::disjoint_set::{DisjointSets, SetId};
use crate::error::{ExprNotInGraphSnafu, IdNotInGraphSnafu, PropagationLimitExceededSnafu, Result};
use crate::mode::IdMappingMode;

/// A group of dimensions considered the same under one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("idg{}", _0.index())]
pub struct IdGroup(SetId);

/// A group of transforms considered the same under one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("exg{}", _0.index())]
pub struct ExprGroup(SetId);

pub type IdGroups = IndexSet<IdGroup>;
pub type ExprGroups = IndexSet<ExprGroup>;

/// Raw per-dimension transform sets, before grouping.
pub type IdExprMap = IndexMap<IterDomainId, IndexSet<ExprId>>;

#[derive(Debug, Clone)]
pub struct IdGraph<'f> {
    fusion: &'f Fusion,
    mode: IdMappingMode,
    propagation_limit: usize,
    id_sets: DisjointSets<IterDomainId>,
    expr_sets: DisjointSets<ExprId>,
    unique_definitions: IndexMap<IdGroup, ExprGroups>,
    unique_uses: IndexMap<IdGroup, ExprGroups>,
    id_definitions: IdExprMap,
    id_uses: IdExprMap,
}

impl<'f> IdGraph<'f> {
    pub fn new(fusion: &'f Fusion, mode: IdMappingMode, propagation_limit: usize) -> Self {
        Self {
            fusion,
            mode,
            propagation_limit,
            id_sets: DisjointSets::new(),
            expr_sets: DisjointSets::new(),
            unique_definitions: IndexMap::new(),
            unique_uses: IndexMap::new(),
            id_definitions: IndexMap::new(),
            id_uses: IndexMap::new(),
        }
    }

    /// Copy of this graph relabelled as `mode`, the starting point for a looser mode.
    pub fn derive(&self, mode: IdMappingMode) -> Self {
        Self { mode, ..self.clone() }
    }

    pub fn mode(&self) -> IdMappingMode {
        self.mode
    }

    pub fn fusion(&self) -> &'f Fusion {
        self.fusion
    }

    pub fn id_sets(&self) -> &DisjointSets<IterDomainId> {
        &self.id_sets
    }

    pub fn expr_sets(&self) -> &DisjointSets<ExprId> {
        &self.expr_sets
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub fn find_group(&self, id: IterDomainId) -> Option<IdGroup> {
        self.id_sets.find(&id).map(IdGroup)
    }

    pub fn find_expr_group(&self, expr: ExprId) -> Option<ExprGroup> {
        self.expr_sets.find(&expr).map(ExprGroup)
    }

    pub fn are_mapped(&self, a: IterDomainId, b: IterDomainId) -> bool {
        self.id_sets.are_grouped(&a, &b)
    }

    pub fn exprs_are_mapped(&self, a: ExprId, b: ExprId) -> bool {
        self.expr_sets.are_grouped(&a, &b)
    }

    /// Current handle of a possibly stale group.
    pub fn resolve(&self, group: IdGroup) -> IdGroup {
        IdGroup(self.id_sets.resolve(group.0))
    }

    pub fn resolve_expr(&self, group: ExprGroup) -> ExprGroup {
        ExprGroup(self.expr_sets.resolve(group.0))
    }

    pub fn members(&self, group: IdGroup) -> &IndexSet<IterDomainId> {
        self.id_sets.members(group.0)
    }

    pub fn expr_members(&self, group: ExprGroup) -> &IndexSet<ExprId> {
        self.expr_sets.members(group.0)
    }

    /// Representative transform of a group.
    fn front(&self, group: ExprGroup) -> Option<&'f Expr> {
        let fusion = self.fusion;
        self.expr_members(group).first().map(|expr| fusion.expr(*expr))
    }

    /// Every dimension group, in creation order.
    pub fn id_groups(&self) -> IdGroups {
        self.id_sets.sets().map(|(set, _)| IdGroup(set)).collect()
    }

    /// Every transform group, in creation order.
    pub fn expr_groups(&self) -> ExprGroups {
        self.expr_sets.sets().map(|(set, _)| ExprGroup(set)).collect()
    }

    /// Groups of `ids`; dimensions not in this graph are skipped.
    pub fn to_id_groups(&self, ids: &[IterDomainId]) -> IdGroups {
        ids.iter().filter_map(|id| self.find_group(*id)).collect()
    }

    /// Groups of `exprs`; transforms not in this graph are skipped.
    pub fn to_expr_groups(&self, exprs: &[ExprId]) -> ExprGroups {
        exprs.iter().filter_map(|expr| self.find_expr_group(*expr)).collect()
    }

    /// Groups of the representative's inputs, positionally.
    pub fn input_groups(&self, group: ExprGroup) -> Vec<IdGroup> {
        self.front(group).map(|expr| self.groups_of(expr.inputs())).unwrap_or_default()
    }

    /// Groups of the representative's outputs, positionally.
    pub fn output_groups(&self, group: ExprGroup) -> Vec<IdGroup> {
        self.front(group).map(|expr| self.groups_of(expr.outputs())).unwrap_or_default()
    }

    fn groups_of(&self, ids: &[IterDomainId]) -> Vec<IdGroup> {
        ids.iter().filter_map(|id| self.find_group(*id)).collect()
    }

    /// Transform group whose input and output groups overlap.
    pub fn is_trivial_expr_group(&self, group: ExprGroup) -> bool {
        let inputs = self.input_groups(group);
        self.output_groups(group).iter().any(|out| inputs.contains(out))
    }

    /// Canonical member of `group`: a parallelized dimension if any, else a
    /// non-broadcast one, else the first member.
    pub fn concrete_id(&self, group: IdGroup) -> Option<IterDomainId> {
        let members = self.members(group);
        let domain = |id: &&IterDomainId| self.fusion.iter_domain(**id);
        members
            .iter()
            .find(|id| domain(id).is_parallelized())
            .or_else(|| members.iter().find(|id| !domain(id).is_broadcast()))
            .or_else(|| members.first())
            .copied()
    }

    // =========================================================================
    // Definitions and uses
    // =========================================================================

    /// Raw transforms producing `id` that belong to this graph.
    pub fn definitions(&self, id: IterDomainId) -> Option<&IndexSet<ExprId>> {
        self.id_definitions.get(&id)
    }

    /// Raw transforms consuming `id` that belong to this graph.
    pub fn uses(&self, id: IterDomainId) -> Option<&IndexSet<ExprId>> {
        self.id_uses.get(&id)
    }

    /// Transform groups producing `group`.
    ///
    /// Falls back to the members' raw definitions when the group has no index entry.
    pub fn unique_definitions(&self, group: IdGroup) -> ExprGroups {
        self.indexed_or_raw(&self.unique_definitions, &self.id_definitions, group)
    }

    /// Transform groups consuming `group`.
    ///
    /// Falls back to the members' raw uses when the group has no index entry.
    pub fn unique_uses(&self, group: IdGroup) -> ExprGroups {
        self.indexed_or_raw(&self.unique_uses, &self.id_uses, group)
    }

    fn indexed_or_raw(&self, index: &IndexMap<IdGroup, ExprGroups>, raw: &IdExprMap, group: IdGroup) -> ExprGroups {
        let group = self.resolve(group);
        match index.get(&group) {
            Some(exprs) => exprs.iter().map(|eg| self.resolve_expr(*eg)).collect(),
            None => self
                .members(group)
                .iter()
                .filter_map(|id| raw.get(id))
                .flatten()
                .filter_map(|expr| self.find_expr_group(*expr))
                .collect(),
        }
    }

    /// Transitive closure of transform groups reachable forward from `groups`.
    pub fn all_uses_of(&self, groups: &IdGroups) -> ExprGroups {
        self.closure(groups, |g| self.unique_uses(g), |eg| self.output_groups(eg))
    }

    /// Transitive closure of transform groups reachable backward from `groups`.
    pub fn all_definitions_of(&self, groups: &IdGroups) -> ExprGroups {
        self.closure(groups, |g| self.unique_definitions(g), |eg| self.input_groups(eg))
    }

    fn closure(
        &self,
        groups: &IdGroups,
        next_exprs: impl Fn(IdGroup) -> ExprGroups,
        next_ids: impl Fn(ExprGroup) -> Vec<IdGroup>,
    ) -> ExprGroups {
        let mut found = ExprGroups::new();
        let mut stack: Vec<IdGroup> = groups.iter().map(|g| self.resolve(*g)).collect();
        let mut seen: IdGroups = stack.iter().copied().collect();
        while let Some(group) = stack.pop() {
            for eg in next_exprs(group) {
                if found.insert(eg) {
                    stack.extend(next_ids(eg).into_iter().filter(|g| seen.insert(*g)));
                }
            }
        }
        found
    }

    /// For every dimension of `from`, the dimensions of `to` in the same group, in `to` order.
    pub fn build_map_between(
        &self,
        from: &[IterDomainId],
        to: &[IterDomainId],
    ) -> IndexMap<IterDomainId, Vec<IterDomainId>> {
        from.iter()
            .map(|f| {
                let mapped = match self.find_group(*f) {
                    Some(group) => to.iter().copied().filter(|t| self.find_group(*t) == Some(group)).collect(),
                    None => Vec::new(),
                };
                (*f, mapped)
            })
            .collect()
    }

    // =========================================================================
    // Structural matching
    // =========================================================================

    /// Pairs of dimensions a transform leaves index-equivalent, if it is an identity at
    /// the dimension level: merges with a unit extent operand, splits by one, and
    /// swizzles that do not swizzle.
    pub fn is_trivial_expr(fusion: &Fusion, expr: &Expr) -> SmallVec<[(IterDomainId, IterDomainId); 2]> {
        let (inputs, outputs) = (expr.inputs(), expr.outputs());
        let mut pairs = SmallVec::new();
        match expr.kind() {
            ExprKind::Merge => {
                let (outer, inner, out) = (inputs[0], inputs[1], outputs[0]);
                if fusion.iter_domain(inner).extent().is_one() {
                    pairs.push((outer, out));
                }
                if fusion.iter_domain(outer).extent().is_one() {
                    pairs.push((inner, out));
                }
            }
            ExprKind::Split { factor, inner_split } => {
                if factor.is_one() {
                    pairs.push((inputs[0], if *inner_split { outputs[0] } else { outputs[1] }));
                }
            }
            ExprKind::Swizzle2D { swizzle_type, mode } => {
                if *swizzle_type == SwizzleType::NoSwizzle || *mode == SwizzleMode::NoSwizzle {
                    pairs.push((inputs[0], outputs[0]));
                    pairs.push((inputs[1], outputs[1]));
                }
            }
        }
        pairs
    }

    /// Whether `a` and `b` describe the same transform given the current partition.
    ///
    /// Forward compares inputs positionally, backward compares outputs. Never mutates.
    pub fn exprs_map(&self, a: ExprId, b: ExprId, forward: bool) -> bool {
        if a == b {
            return true;
        }
        let (ea, eb) = (self.fusion.expr(a), self.fusion.expr(b));

        let same_kind = match (ea.kind(), eb.kind()) {
            (
                ExprKind::Split { factor: fa, inner_split: ia },
                ExprKind::Split { factor: fb, inner_split: ib },
            ) => fa == fb && ia == ib,
            (ExprKind::Merge, ExprKind::Merge) => true,
            (
                ExprKind::Swizzle2D { swizzle_type: ta, mode: ma },
                ExprKind::Swizzle2D { swizzle_type: tb, mode: mb },
            ) => ta == tb && ma == mb,
            (ExprKind::Split { .. }, _) | (ExprKind::Merge, _) | (ExprKind::Swizzle2D { .. }, _) => false,
        };
        if !same_kind || ea.inputs().len() != eb.inputs().len() || ea.outputs().len() != eb.outputs().len() {
            return false;
        }

        // EXACT never puts a broadcast dimension next to an iterated one, so every
        // dimension the match would map must agree on it.
        if self.mode == IdMappingMode::Exact {
            let broadcast_agrees = |xs: &[IterDomainId], ys: &[IterDomainId]| {
                xs.iter().zip(ys).all(|(x, y)| {
                    self.fusion.iter_domain(*x).is_broadcast() == self.fusion.iter_domain(*y).is_broadcast()
                })
            };
            if !broadcast_agrees(ea.inputs(), eb.inputs()) || !broadcast_agrees(ea.outputs(), eb.outputs()) {
                return false;
            }
        }

        let (side_a, side_b) = if forward { (ea.inputs(), eb.inputs()) } else { (ea.outputs(), eb.outputs()) };
        if !side_a.iter().zip(side_b).all(|(x, y)| self.are_mapped(*x, *y)) {
            return false;
        }

        // Going backward through a merge only tells us the products agree; at least one
        // operand has to agree as well before the inputs can be split back apart.
        if !forward && ea.is_merge() {
            let operand_agrees = |pos: usize| {
                let (x, y) = (ea.inputs()[pos], eb.inputs()[pos]);
                self.fusion.iter_domain(x).extent() == self.fusion.iter_domain(y).extent() || self.are_mapped(x, y)
            };
            return operand_agrees(0) || operand_agrees(1);
        }
        true
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Register `id` with the transforms defining and using it.
    pub fn initialize_id(&mut self, id: IterDomainId, definitions: IndexSet<ExprId>, uses: IndexSet<ExprId>) -> IdGroup {
        let (set, _) = self.id_sets.initialize(id);
        let group = IdGroup(set);

        let mut to_groups = |exprs: &IndexSet<ExprId>| -> ExprGroups {
            exprs.iter().map(|expr| ExprGroup(self.expr_sets.initialize(*expr).0)).collect()
        };
        let def_groups = to_groups(&definitions);
        let use_groups = to_groups(&uses);

        self.unique_definitions.entry(group).or_default().extend(def_groups);
        self.unique_uses.entry(group).or_default().extend(use_groups);
        self.id_definitions.entry(id).or_default().extend(definitions);
        self.id_uses.entry(id).or_default().extend(uses);
        group
    }

    /// Map `a` and `b` together and propagate through matching transforms until
    /// nothing changes.
    #[tracing::instrument(level = "trace", skip(self), fields(mode = %self.mode))]
    pub fn map_ids(&mut self, a: IterDomainId, b: IterDomainId) -> Result<()> {
        let (request_a, request_b) = (a, b);
        let mut pending = VecDeque::from([(a, b)]);
        let mut steps = 0usize;

        while let Some((a, b)) = pending.pop_front() {
            let mode = self.mode;
            let ga = self.find_group(a).context(IdNotInGraphSnafu { id: a, mode })?;
            let gb = self.find_group(b).context(IdNotInGraphSnafu { id: b, mode })?;
            if ga == gb {
                continue;
            }

            steps += 1;
            snafu::ensure!(
                steps <= self.propagation_limit,
                PropagationLimitExceededSnafu { a: request_a, b: request_b, mode, limit: self.propagation_limit }
            );

            let (defs_a, uses_a) = (self.unique_definitions(ga), self.unique_uses(ga));
            let (defs_b, uses_b) = (self.unique_definitions(gb), self.unique_uses(gb));

            let Some((survivor, _)) = self.id_sets.union(a, b) else { continue };
            let merged = IdGroup(survivor);
            for old in [ga, gb] {
                self.unique_definitions.shift_remove(&old);
                self.unique_uses.shift_remove(&old);
            }
            self.unique_definitions.insert(merged, defs_a.union(&defs_b).copied().collect());
            self.unique_uses.insert(merged, uses_a.union(&uses_b).copied().collect());

            // Consumers of both sides: same inputs imply same outputs. A merge whose
            // outputs were mapped earlier may only now have an agreeing operand, so it
            // gets another backward try.
            for (ua, ub) in uses_a.iter().cartesian_product(&uses_b) {
                if let Some((ea, eb)) = self.mergeable(*ua, *ub, true) {
                    self.map_exprs(ea.id(), eb.id());
                    pending.extend(ea.outputs().iter().copied().zip(eb.outputs().iter().copied()));
                } else if let Some((ea, eb)) = self.mergeable(*ua, *ub, false) {
                    self.map_exprs(ea.id(), eb.id());
                    pending.extend(ea.inputs().iter().copied().zip(eb.inputs().iter().copied()));
                }
            }
            // Producers of both sides: same outputs imply same inputs.
            for (da, db) in defs_a.iter().cartesian_product(&defs_b) {
                if let Some((ea, eb)) = self.mergeable(*da, *db, false) {
                    self.map_exprs(ea.id(), eb.id());
                    pending.extend(ea.inputs().iter().copied().zip(eb.inputs().iter().copied()));
                }
            }
        }
        Ok(())
    }

    /// A structurally matching pair of members from two distinct transform groups.
    fn mergeable(&self, a: ExprGroup, b: ExprGroup, forward: bool) -> Option<(&'f Expr, &'f Expr)> {
        let (a, b) = (self.resolve_expr(a), self.resolve_expr(b));
        if a == b {
            return None;
        }
        let fusion = self.fusion;
        let (ea, eb) = self
            .expr_members(a)
            .iter()
            .cartesian_product(self.expr_members(b))
            .find(|(x, y)| self.exprs_map(**x, **y, forward))
            .map(|(x, y)| (fusion.expr(*x), fusion.expr(*y)))?;
        tracing::trace!(mode = %self.mode, a = %ea, b = %eb, forward, "transforms matched");
        Some((ea, eb))
    }

    /// Map two transforms together and refresh the definition/use entries that refer
    /// to either.
    pub fn map_exprs(&mut self, a: ExprId, b: ExprId) {
        let Some((survivor, _)) = self.expr_sets.union(a, b) else { return };
        let merged = ExprGroup(survivor);

        let fusion = self.fusion;
        let members: Vec<&'f Expr> = self.expr_members(merged).iter().map(|expr| fusion.expr(*expr)).collect();
        let producers: IdGroups = members.iter().flat_map(|e| e.inputs()).filter_map(|id| self.find_group(*id)).collect();
        let consumers: IdGroups = members.iter().flat_map(|e| e.outputs()).filter_map(|id| self.find_group(*id)).collect();

        for group in producers {
            let refreshed: ExprGroups = self.unique_uses(group);
            self.unique_uses.insert(group, refreshed);
        }
        for group in consumers {
            let refreshed: ExprGroups = self.unique_definitions(group);
            self.unique_definitions.insert(group, refreshed);
        }
    }

    /// If `a` and `b` match, map them and their outputs (forward) or inputs (backward).
    pub fn map_through_expr(&mut self, a: ExprId, b: ExprId, forward: bool) -> Result<bool> {
        let mode = self.mode;
        for expr in [a, b] {
            snafu::ensure!(self.expr_sets.contains(&expr), ExprNotInGraphSnafu { expr, mode });
        }
        if !self.exprs_map(a, b, forward) {
            return Ok(false);
        }
        self.map_exprs(a, b);
        let fusion = self.fusion;
        let (ea, eb) = (fusion.expr(a), fusion.expr(b));
        let (side_a, side_b) = if forward { (ea.outputs(), eb.outputs()) } else { (ea.inputs(), eb.inputs()) };
        for (x, y) in side_a.iter().zip(side_b) {
            self.map_ids(*x, *y)?;
        }
        Ok(true)
    }

    /// Register a transform of dimensions already in the graph. Its outputs start as
    /// fresh groups and then follow any existing consumer of the same inputs it matches.
    pub fn add_transform(&mut self, expr: ExprId) -> Result<()> {
        let (fusion, mode) = (self.fusion, self.mode);
        let transform = fusion.expr(expr);
        let input_groups = transform
            .inputs()
            .iter()
            .map(|id| self.find_group(*id).context(IdNotInGraphSnafu { id: *id, mode }))
            .collect::<Result<Vec<IdGroup>>>()?;

        let group = ExprGroup(self.expr_sets.initialize(expr).0);
        for (input, input_group) in transform.inputs().iter().zip(&input_groups) {
            self.id_uses.entry(*input).or_default().insert(expr);
            let mut uses = self.unique_uses(*input_group);
            uses.insert(group);
            self.unique_uses.insert(*input_group, uses);
        }
        for output in transform.outputs() {
            self.initialize_id(*output, IndexSet::from([expr]), IndexSet::new());
        }

        let candidates = input_groups.first().map(|first| self.unique_uses(*first)).unwrap_or_default();
        for candidate in candidates {
            if self.find_expr_group(expr) == Some(self.resolve_expr(candidate)) {
                continue;
            }
            let members: Vec<ExprId> = self.expr_members(candidate).iter().copied().collect();
            for other in members {
                if self.map_through_expr(other, expr, true)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Loop swizzles only reorder iteration, so their inputs and outputs are the same loops.
    pub fn map_through_loop_swizzles(&mut self) -> Result<()> {
        let fusion = self.fusion;
        let swizzles: Vec<&'f Expr> = self
            .expr_sets
            .entries()
            .map(|expr| fusion.expr(*expr))
            .filter(|expr| expr.kind().is_loop_swizzle())
            .collect();
        for swizzle in swizzles {
            for (input, output) in swizzle.inputs().iter().zip(swizzle.outputs()) {
                self.map_ids(*input, *output)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for IdGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} graph:", self.mode)?;
        writeln!(f, "  id groups:")?;
        for (set, members) in self.id_sets.sets() {
            writeln!(f, "    {}: {{{}}}", IdGroup(set), members.iter().join(", "))?;
        }
        writeln!(f, "  expr groups:")?;
        for (set, members) in self.expr_sets.sets() {
            let group = ExprGroup(set);
            writeln!(
                f,
                "    {group}: {{{}}} ({}) -> ({})",
                members.iter().join(", "),
                self.input_groups(group).iter().join(", "),
                self.output_groups(group).iter().join(", ")
            )?;
        }
        Ok(())
    }
}
