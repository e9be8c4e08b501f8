//! Test utilities for graph construction.

use indexmap::IndexSet;

use kiln_ir::{ExprId, Fusion, IterDomainId};

use crate::{IdGraph, IdGraphConfig, IdMappingMode, IterDomainGraphs};

/// Build every mode graph over all ops of `fusion` with the default configuration.
pub fn build(fusion: &Fusion) -> IterDomainGraphs<'_> {
    build_with(fusion, IdGraphConfig::default())
}

pub fn build_with(fusion: &Fusion, config: IdGraphConfig) -> IterDomainGraphs<'_> {
    IterDomainGraphs::build(fusion, &fusion.tensor_op_ids(), &[], config).unwrap()
}

/// A standalone graph over `ids`, with definitions and uses taken from the fusion's
/// transforms among them.
pub fn graph_over<'f>(fusion: &'f Fusion, ids: &[IterDomainId], mode: IdMappingMode) -> IdGraph<'f> {
    let mut graph = IdGraph::new(fusion, mode, IdGraphConfig::default().propagation_limit);
    for id in ids {
        let definitions: IndexSet<ExprId> = fusion.definition(*id).map(|expr| expr.id()).into_iter().collect();
        let uses: IndexSet<ExprId> =
            fusion.exprs().iter().filter(|expr| expr.inputs().contains(id)).map(|expr| expr.id()).collect();
        graph.initialize_id(*id, definitions, uses);
    }
    graph
}

/// Partition of `graph` as sorted member lists, for order-independent comparison.
pub fn partition(graph: &IdGraph<'_>) -> Vec<Vec<IterDomainId>> {
    let mut groups: Vec<Vec<IterDomainId>> = graph
        .id_groups()
        .iter()
        .map(|group| {
            let mut members: Vec<IterDomainId> = graph.members(*group).iter().copied().collect();
            members.sort();
            members
        })
        .collect();
    groups.sort();
    groups
}
