//! Construction of all mode graphs for one fusion.

use std::collections::HashSet;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use snafu::OptionExt;

use kiln_ir::{ExprId, Fusion, IterDomainId, ParallelType, TensorId, TensorOpId};

use crate::config::IdGraphConfig;
use crate::error::{
    ComputeWithUnresolvedSnafu, DomainKind, Error, IdNotInGraphSnafu, ModeNotBuiltSnafu, ParallelTypeConflictSnafu,
    Result,
};
use crate::id_graph::{ExprGroup, ExprGroups, IdExprMap, IdGraph, IdGroup, IdGroups};
use crate::mode::IdMappingMode;
use crate::policy::{BuildContext, POLICIES, shared_loop_pairs};
use crate::traversal::IdGraphStmtSort;

type ModeGraphs<'f> = IndexMap<IdMappingMode, IdGraph<'f>>;

/// Two dimensions of one tensor found in the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfMapping {
    pub tensor: TensorId,
    pub first: IterDomainId,
    pub second: IterDomainId,
    pub domain: DomainKind,
    pub mode: IdMappingMode,
}

impl From<SelfMapping> for Error {
    fn from(m: SelfMapping) -> Self {
        Error::SelfMapping { tensor: m.tensor, first: m.first, second: m.second, domain: m.domain, mode: m.mode }
    }
}

/// Per-dimension facts derived from the LOOP graph.
#[derive(Debug, Clone, Default)]
struct LoopState {
    parallel_types: IndexMap<IterDomainId, ParallelType>,
    promotions: IndexMap<IterDomainId, IterDomainId>,
}

/// Every mode graph of a fusion, plus the raw bookkeeping they were built from.
///
/// Graphs are built in a fixed order (EXACT, ALMOST_EXACT, PERMISSIVE, LOOP), each
/// from the previous one. LOOP is validated for parallel-type conflicts right after
/// it is built; self-mapping is checked once all modes exist.
///
/// Mutation after construction is all-or-nothing: changes are applied to copies of
/// the affected graphs and only swapped in once the LOOP graph has been re-validated.
#[derive(Debug, Clone)]
pub struct IterDomainGraphs<'f> {
    fusion: &'f Fusion,
    config: IdGraphConfig,
    graphs: ModeGraphs<'f>,
    id_definitions: IdExprMap,
    id_uses: IdExprMap,
    view_rfactor_ids: IndexSet<IterDomainId>,
    loop_state: LoopState,
    self_mapping: Option<SelfMapping>,
}

impl<'f> IterDomainGraphs<'f> {
    /// Build every mode graph over `ops` and the tensors they touch, plus
    /// `additional_tensors`.
    #[tracing::instrument(skip_all, fields(ops = ops.len(), additional = additional_tensors.len()))]
    pub fn build(
        fusion: &'f Fusion,
        ops: &[TensorOpId],
        additional_tensors: &[TensorId],
        config: IdGraphConfig,
    ) -> Result<Self> {
        let tensors: Vec<TensorId> =
            fusion.tensors_of(ops).into_iter().chain(additional_tensors.iter().copied()).unique().collect();
        let (id_definitions, id_uses, view_rfactor_ids) = build_definitions_and_uses(fusion, &tensors);

        let mut built: Vec<IdGraph<'f>> = Vec::with_capacity(POLICIES.len());
        for policy in POLICIES {
            let mode = policy.mode();
            if mode == IdMappingMode::Loop && !config.build_loop {
                tracing::debug!("LOOP graph disabled");
                continue;
            }
            let ctx = BuildContext {
                fusion,
                ops,
                tensors: &tensors,
                id_definitions: &id_definitions,
                id_uses: &id_uses,
                config: &config,
                built: &built,
            };
            let graph = {
                let _span = tracing::debug_span!("build_mode", %mode).entered();
                policy.build(&ctx)?
            };
            tracing::debug!(
                %mode,
                id_groups = graph.id_sets().len(),
                expr_groups = graph.expr_sets().len(),
                "mode graph built"
            );
            built.push(graph);
        }

        let mut this = Self {
            fusion,
            config,
            graphs: built.into_iter().map(|graph| (graph.mode(), graph)).collect(),
            id_definitions,
            id_uses,
            view_rfactor_ids,
            loop_state: LoopState::default(),
            self_mapping: None,
        };

        this.loop_state = resolve_loop_state(fusion, &this.graphs, &this.view_rfactor_ids)?;

        this.self_mapping = this.find_first_self_mapping(&tensors);
        if let Some(mapping) = this.self_mapping {
            if !this.config.allow_self_mapping {
                return Err(mapping.into());
            }
            tracing::warn!(
                tensor = %mapping.tensor,
                first = %mapping.first,
                second = %mapping.second,
                domain = %mapping.domain,
                mode = %mapping.mode,
                "self-mapping tolerated"
            );
        }
        Ok(this)
    }

    pub fn fusion(&self) -> &'f Fusion {
        self.fusion
    }

    pub fn config(&self) -> &IdGraphConfig {
        &self.config
    }

    /// Graph for `mode`; `None` only for LOOP when it was disabled.
    pub fn id_graph(&self, mode: IdMappingMode) -> Option<&IdGraph<'f>> {
        self.graphs.get(&mode)
    }

    pub fn id_graph_mut(&mut self, mode: IdMappingMode) -> Option<&mut IdGraph<'f>> {
        self.graphs.get_mut(&mode)
    }

    fn graph(&self, mode: IdMappingMode) -> Result<&IdGraph<'f>> {
        self.graphs.get(&mode).context(ModeNotBuiltSnafu { mode })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn find_group(&self, id: IterDomainId, mode: IdMappingMode) -> Option<IdGroup> {
        self.id_graph(mode)?.find_group(id)
    }

    pub fn find_expr_group(&self, expr: ExprId, mode: IdMappingMode) -> Option<ExprGroup> {
        self.id_graph(mode)?.find_expr_group(expr)
    }

    pub fn are_mapped(&self, a: IterDomainId, b: IterDomainId, mode: IdMappingMode) -> bool {
        self.id_graph(mode).is_some_and(|graph| graph.are_mapped(a, b))
    }

    /// Canonical representative of the group of `id` under `mode`.
    pub fn concrete_mapped_id(&self, id: IterDomainId, mode: IdMappingMode) -> Option<IterDomainId> {
        let graph = self.id_graph(mode)?;
        graph.concrete_id(graph.find_group(id)?)
    }

    pub fn to_id_groups(&self, ids: &[IterDomainId], mode: IdMappingMode) -> IdGroups {
        self.id_graph(mode).map(|graph| graph.to_id_groups(ids)).unwrap_or_default()
    }

    pub fn to_expr_groups(&self, exprs: &[ExprId], mode: IdMappingMode) -> ExprGroups {
        self.id_graph(mode).map(|graph| graph.to_expr_groups(exprs)).unwrap_or_default()
    }

    /// Transform groups deriving `to` from `from` under `mode`, in forward order.
    pub fn exprs_between(
        &self,
        from: &[IterDomainId],
        to: &[IterDomainId],
        mode: IdMappingMode,
    ) -> Result<Vec<ExprGroup>> {
        let graph = self.graph(mode)?;
        graph.exprs_between(&graph.to_id_groups(from), &graph.to_id_groups(to))
    }

    /// Topological order of the groups under `mode`.
    pub fn stmt_sort(&self, mode: IdMappingMode, sub_selection: Option<&[IterDomainId]>) -> Result<IdGraphStmtSort> {
        IdGraphStmtSort::new(self.graph(mode)?, sub_selection)
    }

    pub fn has_self_mapping(&self) -> bool {
        self.self_mapping.is_some()
    }

    pub fn self_mapping(&self) -> Option<&SelfMapping> {
        self.self_mapping.as_ref()
    }

    /// The first transform consuming `id`.
    pub fn id_use(&self, id: IterDomainId) -> Option<ExprId> {
        self.id_uses.get(&id)?.first().copied()
    }

    /// The transform producing `id`, unless `id` is a root dimension.
    pub fn id_def(&self, id: IterDomainId) -> Option<ExprId> {
        self.id_definitions.get(&id)?.first().copied()
    }

    /// Dimensions on the rfactor domain of a reshape.
    pub fn view_rfactor_ids(&self) -> &IndexSet<IterDomainId> {
        &self.view_rfactor_ids
    }

    /// Parallel type shared by the LOOP group of `id`.
    pub fn loop_parallel_type(&self, id: IterDomainId) -> Option<ParallelType> {
        self.loop_state.parallel_types.get(&id).copied()
    }

    /// Member of the LOOP group of `id` that covers the iteration of every other member.
    pub fn loop_promotion(&self, id: IterDomainId) -> Option<IterDomainId> {
        self.loop_state.promotions.get(&id).copied()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Map `a` and `b` under `mode` after construction, with full propagation.
    ///
    /// The mapping is repeated in every looser analytical mode so the modes keep
    /// refining each other; LOOP mappings stay in LOOP. Nothing changes on error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn map_ids(&mut self, mode: IdMappingMode, a: IterDomainId, b: IterDomainId) -> Result<()> {
        self.graph(mode)?;
        let mut graphs = self.graphs.clone();
        for target in mode.and_looser() {
            if let Some(graph) = graphs.get_mut(&target) {
                graph.map_ids(a, b)?;
            }
        }
        self.commit(graphs)
    }

    /// Register `replay`, a transform created with
    /// [`Fusion::replay_expr`](kiln_ir::Fusion::replay_expr), in every mode whose
    /// graph holds all of its inputs.
    ///
    /// The replay's outputs join the groups of an existing transform it matches
    /// forward. Its inputs must at least be known to EXACT. Registering the same
    /// replay twice is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn add_replay_as(&mut self, replay: ExprId) -> Result<()> {
        let fusion = self.fusion;
        let transform = fusion.expr(replay);
        let exact = self.graph(IdMappingMode::Exact)?;
        if exact.find_expr_group(replay).is_some() {
            return Ok(());
        }
        if let Some(id) = transform.inputs().iter().find(|id| exact.find_group(**id).is_none()) {
            return IdNotInGraphSnafu { id: *id, mode: IdMappingMode::Exact }.fail();
        }

        let mut graphs = self.graphs.clone();
        for graph in graphs.values_mut() {
            if transform.inputs().iter().all(|id| graph.find_group(*id).is_some()) {
                graph.add_transform(replay)?;
            }
        }
        self.commit(graphs)?;

        for input in transform.inputs() {
            self.id_uses.entry(*input).or_default().insert(replay);
        }
        for output in transform.outputs() {
            self.id_definitions.entry(*output).or_default().insert(replay);
            self.id_uses.entry(*output).or_default();
        }
        tracing::debug!(%replay, outputs = transform.outputs().len(), "replay registered");
        Ok(())
    }

    /// Join the leading leaf loops of `tv` with those of its resolved compute-with
    /// consumer in LOOP.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn update_compute_with(&mut self, tv: TensorId) -> Result<()> {
        let fusion = self.fusion;
        let producer = fusion.tensor(tv);
        let (consumer, position) = producer.compute_with().context(ComputeWithUnresolvedSnafu { tensor: tv })?;
        let pairs = shared_loop_pairs(self.graph(IdMappingMode::Permissive)?, producer, fusion.tensor(consumer), position);

        let mut graphs = self.graphs.clone();
        let graph = graphs.get_mut(&IdMappingMode::Loop).context(ModeNotBuiltSnafu { mode: IdMappingMode::Loop })?;
        for (p, c) in &pairs {
            graph.map_ids(*p, *c)?;
        }
        self.commit(graphs)?;
        tracing::debug!(%tv, %consumer, position, shared = pairs.len(), "compute-with loops shared");
        Ok(())
    }

    /// Swap in `graphs` once their LOOP state resolves cleanly.
    fn commit(&mut self, graphs: ModeGraphs<'f>) -> Result<()> {
        self.loop_state = resolve_loop_state(self.fusion, &graphs, &self.view_rfactor_ids)?;
        self.graphs = graphs;
        Ok(())
    }

    /// Root and rfactor domains are checked under EXACT, leaf domains under PERMISSIVE.
    fn find_first_self_mapping(&self, tensors: &[TensorId]) -> Option<SelfMapping> {
        let exact = self.id_graph(IdMappingMode::Exact)?;
        let permissive = self.id_graph(IdMappingMode::Permissive)?;

        tensors.iter().map(|tv| self.fusion.tensor(*tv)).find_map(|tv| {
            let mut checks = vec![(tv.root(), exact, DomainKind::Root)];
            if let Some(rfactor) = tv.rfactor() {
                checks.push((rfactor, exact, DomainKind::Rfactor));
            }
            checks.push((tv.leaf(), permissive, DomainKind::Leaf));

            checks.into_iter().find_map(|(ids, graph, domain)| {
                let (first, second) = detect_mappable_pair(graph, ids)?;
                Some(SelfMapping { tensor: tv.id(), first, second, domain, mode: graph.mode() })
            })
        })
    }
}

/// Parallel types and promotions for every LOOP member, or nothing when LOOP was not
/// built.
///
/// Every LOOP group may carry at most one non-serial parallel type; it is recorded for
/// every member.
fn resolve_loop_state(
    fusion: &Fusion,
    graphs: &ModeGraphs<'_>,
    view_rfactor_ids: &IndexSet<IterDomainId>,
) -> Result<LoopState> {
    let Some(graph) = graphs.get(&IdMappingMode::Loop) else {
        return Ok(LoopState::default());
    };

    let mut parallel_types = IndexMap::new();
    for group in graph.id_groups() {
        let members = graph.members(group);
        let mut found: Option<ParallelType> = None;
        for id in members {
            let ptype = fusion.iter_domain(*id).parallel_type();
            if ptype == ParallelType::Serial {
                continue;
            }
            match found {
                None => found = Some(ptype),
                Some(first) if first != ptype => {
                    tracing::error!(%id, %first, second = %ptype, "conflicting parallel types in LOOP group");
                    return ParallelTypeConflictSnafu { id: *id, first, second: ptype }.fail();
                }
                Some(_) => {}
            }
        }
        let ptype = found.unwrap_or_default();
        parallel_types.extend(members.iter().map(|id| (*id, ptype)));
    }

    let promotions = match graphs.get(&IdMappingMode::AlmostExact) {
        Some(almost_exact) => loop_promotions(graph, Coverage::new(almost_exact, view_rfactor_ids)),
        None => IndexMap::new(),
    };
    Ok(LoopState { parallel_types, promotions })
}

/// For each LOOP group, the first member whose coverage includes every other member's.
/// Groups without such a member get no entry: their loop would need a replayed
/// dimension.
fn loop_promotions(graph: &IdGraph<'_>, mut coverage: Coverage<'_, '_>) -> IndexMap<IterDomainId, IterDomainId> {
    let mut promotions = IndexMap::new();
    for group in graph.id_groups() {
        let members = graph.members(group);
        let covered: Vec<(IterDomainId, IdGroups)> = members.iter().map(|id| (*id, coverage.of(*id))).collect();
        let needed: IdGroups = covered.iter().flat_map(|(_, groups)| groups.iter().copied()).collect();
        match covered.iter().find(|(_, groups)| needed.is_subset(groups)) {
            Some((promoted, _)) => promotions.extend(members.iter().map(|id| (*id, *promoted))),
            None => tracing::debug!(%group, members = members.len(), "no LOOP member covers its group"),
        }
    }
    promotions
}

/// ALMOST_EXACT input groups each dimension is derived from.
///
/// Groups without a non-trivial definition and groups holding a reshape's rfactor
/// dimensions count as inputs. Broadcast inputs cover nothing, they are resolved by
/// whatever they are broadcast against.
struct Coverage<'a, 'f> {
    graph: &'a IdGraph<'f>,
    view_rfactor_ids: &'a IndexSet<IterDomainId>,
    memo: IndexMap<IdGroup, IdGroups>,
}

impl<'a, 'f> Coverage<'a, 'f> {
    fn new(graph: &'a IdGraph<'f>, view_rfactor_ids: &'a IndexSet<IterDomainId>) -> Self {
        Self { graph, view_rfactor_ids, memo: IndexMap::new() }
    }

    fn of(&mut self, id: IterDomainId) -> IdGroups {
        match self.graph.find_group(id) {
            Some(group) => self.of_group(group, &mut IdGroups::new()),
            None => IdGroups::new(),
        }
    }

    fn of_group(&mut self, group: IdGroup, visiting: &mut IdGroups) -> IdGroups {
        if let Some(covered) = self.memo.get(&group) {
            return covered.clone();
        }
        let graph = self.graph;
        let members = graph.members(group);
        let definitions: Vec<ExprGroup> = graph
            .unique_definitions(group)
            .into_iter()
            .filter(|eg| !graph.is_trivial_expr_group(*eg))
            .collect();

        let covered = if definitions.is_empty() || members.iter().any(|id| self.view_rfactor_ids.contains(id)) {
            if members.iter().all(|id| graph.fusion().iter_domain(*id).is_broadcast()) {
                IdGroups::new()
            } else {
                IdGroups::from([group])
            }
        } else {
            // Cycles only come from mappings requested after construction; cut them here.
            if !visiting.insert(group) {
                return IdGroups::new();
            }
            let mut covered = IdGroups::new();
            for eg in definitions {
                for input in graph.input_groups(eg) {
                    covered.extend(self.of_group(input, visiting));
                }
            }
            visiting.shift_remove(&group);
            covered
        };
        self.memo.insert(group, covered.clone());
        covered
    }
}

impl fmt::Display for IterDomainGraphs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for graph in self.graphs.values() {
            write!(f, "{graph}")?;
        }
        if let Some(m) = &self.self_mapping {
            writeln!(f, "self-mapping: {} {} ~ {} ({} domain, {})", m.tensor, m.first, m.second, m.domain, m.mode)?;
        }
        let promoted: Vec<_> = self.loop_state.promotions.iter().filter(|(id, promoted)| id != promoted).collect();
        if !promoted.is_empty() {
            writeln!(f, "loop promotions:")?;
            for (id, target) in promoted {
                writeln!(f, "  {id} -> {target}")?;
            }
        }
        Ok(())
    }
}

/// First pair of distinct dimensions of `ids` that `graph` maps together.
fn detect_mappable_pair(graph: &IdGraph<'_>, ids: &[IterDomainId]) -> Option<(IterDomainId, IterDomainId)> {
    ids.iter().tuple_combinations().find(|(a, b)| a != b && graph.are_mapped(**a, **b)).map(|(a, b)| (*a, *b))
}

/// Raw definitions and uses of every dimension reachable from `tensors`.
///
/// Root dimensions get no definitions: the root domain is where a tensor's declared
/// iteration space starts.
fn build_definitions_and_uses(
    fusion: &Fusion,
    tensors: &[TensorId],
) -> (IdExprMap, IdExprMap, IndexSet<IterDomainId>) {
    let mut definitions = IdExprMap::new();
    let mut uses = IdExprMap::new();
    let mut view_rfactor_ids = IndexSet::new();

    for tv in tensors.iter().map(|tv| fusion.tensor(*tv)) {
        if tv.has_view_like_rfactor() {
            view_rfactor_ids.extend(tv.maybe_rfactor().iter().copied());
        }

        let root: HashSet<IterDomainId> = tv.root().iter().copied().collect();
        for id in fusion.all_ids_of(tv.id()) {
            definitions.entry(id).or_default();
            uses.entry(id).or_default();
            if root.contains(&id) {
                continue;
            }
            if let Some(def) = fusion.definition(id) {
                definitions.entry(id).or_default().insert(def.id());
                for input in def.inputs() {
                    uses.entry(*input).or_default().insert(def.id());
                }
            }
        }
    }
    (definitions, uses, view_rfactor_ids)
}
