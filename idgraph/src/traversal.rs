//! Topological traversal of a mode graph.
//!
//! Groups are visited in dependency order: a transform group once all its input
//! groups are visited, a dimension group once all its defining transform groups are.
//! Transform groups whose inputs and outputs overlap carry no direction and are
//! skipped. Ties are broken by discovery order, so the order is deterministic.

use std::collections::VecDeque;

use kiln_ir::IterDomainId;

use crate::error::{Result, TraversalStalledSnafu};
use crate::id_graph::{ExprGroup, ExprGroups, IdGraph, IdGroup, IdGroups};

/// Callbacks invoked by [`traverse`] in visiting order.
pub trait IdGraphVisitor {
    fn handle_id_group(&mut self, group: IdGroup);
    fn handle_expr_group(&mut self, group: ExprGroup);
}

/// Walk `graph` forward, optionally restricted to the groups of `sub_selection`.
///
/// With a selection, only transform groups whose inputs and outputs all lie in the
/// selected groups take part. Returns [`TraversalStalled`](crate::Error::TraversalStalled)
/// if some groups can never become ready, which means the graph has a cycle.
#[tracing::instrument(level = "debug", skip_all, fields(mode = %graph.mode()))]
pub fn traverse<V: IdGraphVisitor>(
    graph: &IdGraph<'_>,
    sub_selection: Option<&[IterDomainId]>,
    visitor: &mut V,
) -> Result<()> {
    let all_ids: IdGroups = match sub_selection {
        Some(ids) => graph.to_id_groups(ids),
        None => graph.id_groups(),
    };

    let all_exprs: ExprGroups = all_ids
        .iter()
        .flat_map(|group| graph.unique_definitions(*group).into_iter().chain(graph.unique_uses(*group)))
        .filter(|eg| {
            let inside = |groups: Vec<IdGroup>| groups.iter().all(|g| all_ids.contains(g));
            !graph.is_trivial_expr_group(*eg) && inside(graph.input_groups(*eg)) && inside(graph.output_groups(*eg))
        })
        .collect();

    let definitions_in_scope = |group: IdGroup| -> ExprGroups {
        graph.unique_definitions(group).into_iter().filter(|eg| all_exprs.contains(eg)).collect()
    };
    let uses_in_scope = |group: IdGroup| -> ExprGroups {
        graph.unique_uses(group).into_iter().filter(|eg| all_exprs.contains(eg)).collect()
    };

    let mut visited_ids = IdGroups::new();
    let mut visited_exprs = ExprGroups::new();
    let mut to_visit_ids: VecDeque<IdGroup> =
        all_ids.iter().copied().filter(|group| definitions_in_scope(*group).is_empty()).collect();
    let mut to_visit_exprs: VecDeque<ExprGroup> = VecDeque::new();

    while !to_visit_ids.is_empty() || !to_visit_exprs.is_empty() {
        let mut progressed = false;

        let mut still_waiting = VecDeque::new();
        while let Some(current) = to_visit_exprs.pop_front() {
            if visited_exprs.contains(&current) {
                continue;
            }
            if graph.input_groups(current).iter().all(|g| visited_ids.contains(g)) {
                visitor.handle_expr_group(current);
                visited_exprs.insert(current);
                progressed = true;
                to_visit_ids.extend(graph.output_groups(current).into_iter().filter(|g| !visited_ids.contains(g)));
            } else {
                still_waiting.push_back(current);
            }
        }
        to_visit_exprs = still_waiting;

        let mut still_waiting = VecDeque::new();
        while let Some(current) = to_visit_ids.pop_front() {
            if visited_ids.contains(&current) {
                continue;
            }
            if definitions_in_scope(current).iter().all(|eg| visited_exprs.contains(eg)) {
                visitor.handle_id_group(current);
                visited_ids.insert(current);
                progressed = true;
                to_visit_exprs.extend(uses_in_scope(current).into_iter().filter(|eg| !visited_exprs.contains(eg)));
            } else {
                still_waiting.push_back(current);
            }
        }
        to_visit_ids = still_waiting;

        if !progressed {
            break;
        }
    }

    snafu::ensure!(
        visited_ids.len() == all_ids.len(),
        TraversalStalledSnafu { remaining: all_ids.len() - visited_ids.len(), total: all_ids.len() }
    );
    Ok(())
}

/// Groups of a mode graph in topological order.
#[derive(Debug, Clone, Default)]
pub struct IdGraphStmtSort {
    pub ids: IdGroups,
    pub exprs: ExprGroups,
}

impl IdGraphStmtSort {
    pub fn new(graph: &IdGraph<'_>, sub_selection: Option<&[IterDomainId]>) -> Result<Self> {
        let mut sort = Self::default();
        traverse(graph, sub_selection, &mut sort)?;
        Ok(sort)
    }
}

impl IdGraphVisitor for IdGraphStmtSort {
    fn handle_id_group(&mut self, group: IdGroup) {
        self.ids.insert(group);
    }

    fn handle_expr_group(&mut self, group: ExprGroup) {
        self.exprs.insert(group);
    }
}
