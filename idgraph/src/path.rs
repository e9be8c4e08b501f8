//! Minimal transform paths between two sets of dimension groups.

use indexmap::IndexMap;

use crate::error::{Result, TraversalStalledSnafu};
use crate::id_graph::{ExprGroup, ExprGroups, IdGraph, IdGroup, IdGroups};

impl IdGraph<'_> {
    /// Transform groups needed to produce `to` from `from`, in forward order.
    ///
    /// Only transforms both reachable from `from` and leading to `to` are considered.
    /// Each target keeps the cheapest derivation (fewest transforms). Inputs of a
    /// derivation that are not in `from` are accepted as extra sources.
    #[tracing::instrument(level = "debug", skip_all, fields(mode = %self.mode(), from = from.len(), to = to.len()))]
    pub fn exprs_between(&self, from: &IdGroups, to: &IdGroups) -> Result<Vec<ExprGroup>> {
        let from: IdGroups = from.iter().map(|g| self.resolve(*g)).collect();
        let to: IdGroups = to.iter().map(|g| self.resolve(*g)).collect();

        let uses = self.all_uses_of(&from);
        let definitions = self.all_definitions_of(&to);
        let candidates: ExprGroups =
            uses.intersection(&definitions).copied().filter(|eg| !self.is_trivial_expr_group(*eg)).collect();
        let ordered = self.sort_forward(&candidates)?;

        // Cheapest known derivation of each group reached so far.
        let mut required: IndexMap<IdGroup, ExprGroups> = IndexMap::new();
        for eg in &ordered {
            let mut needed = ExprGroups::from([*eg]);
            for input in self.input_groups(*eg) {
                if let Some(upstream) = required.get(&input) {
                    needed.extend(upstream.iter().copied());
                }
            }
            for output in self.output_groups(*eg) {
                if from.contains(&output) {
                    continue;
                }
                let cheaper = required.get(&output).is_none_or(|known| needed.len() < known.len());
                if cheaper {
                    required.insert(output, needed.clone());
                }
            }
        }

        let selected: ExprGroups = to.iter().filter_map(|g| required.get(g)).flatten().copied().collect();
        tracing::debug!(candidates = candidates.len(), selected = selected.len(), "extracted path");
        Ok(ordered.into_iter().filter(|eg| selected.contains(eg)).collect())
    }

    /// Order `exprs` so that every group comes after the groups producing its inputs.
    fn sort_forward(&self, exprs: &ExprGroups) -> Result<Vec<ExprGroup>> {
        let producers: IndexMap<ExprGroup, ExprGroups> = exprs
            .iter()
            .map(|eg| {
                let deps = self
                    .input_groups(*eg)
                    .into_iter()
                    .flat_map(|input| self.unique_definitions(input))
                    .filter(|dep| dep != eg && exprs.contains(dep))
                    .collect();
                (*eg, deps)
            })
            .collect();

        let mut ordered = ExprGroups::new();
        while ordered.len() < exprs.len() {
            let before = ordered.len();
            for (eg, deps) in &producers {
                if !ordered.contains(eg) && deps.iter().all(|dep| ordered.contains(dep)) {
                    ordered.insert(*eg);
                }
            }
            snafu::ensure!(
                ordered.len() > before,
                TraversalStalledSnafu { remaining: exprs.len() - ordered.len(), total: exprs.len() }
            );
        }
        Ok(ordered.into_iter().collect())
    }
}
