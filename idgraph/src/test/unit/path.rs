use kiln_ir::{Fusion, IterType};

use crate::test::helpers::{build, graph_over};
use crate::{IdGroups, IdMappingMode};

use IdMappingMode::Exact;

fn scheduled() -> (Fusion, kiln_ir::TensorId) {
    let mut fusion = Fusion::new();
    let t0 = fusion.add_tensor("T0", [4usize, 8]);
    let t1 = fusion.unary(t0, "T1");
    fusion.merge(t1, 0).unwrap();
    fusion.split(t1, 0, 2usize, true).unwrap();
    (fusion, t1)
}

#[test]
fn test_root_to_leaf() {
    let (fusion, t1) = scheduled();
    let graphs = build(&fusion);
    let graph = graphs.id_graph(Exact).unwrap();
    let tv = fusion.tensor(t1);

    let split = fusion.definition(tv.leaf()[0]).unwrap();
    let merge = fusion.definition(split.inputs()[0]).unwrap();
    let path = graphs.exprs_between(tv.root(), tv.leaf(), Exact).unwrap();
    assert_eq!(path, vec![graph.find_expr_group(merge.id()).unwrap(), graph.find_expr_group(split.id()).unwrap()]);
}

#[test]
fn test_from_intermediate() {
    let (fusion, t1) = scheduled();
    let graphs = build(&fusion);
    let graph = graphs.id_graph(Exact).unwrap();
    let tv = fusion.tensor(t1);

    let split = fusion.definition(tv.leaf()[0]).unwrap();
    let path = graphs.exprs_between(&split.inputs()[..1], tv.leaf(), Exact).unwrap();
    assert_eq!(path, vec![graph.find_expr_group(split.id()).unwrap()]);
}

#[test]
fn test_no_backward_paths() {
    let (fusion, t1) = scheduled();
    let graphs = build(&fusion);
    let tv = fusion.tensor(t1);

    assert!(graphs.exprs_between(tv.leaf(), tv.root(), Exact).unwrap().is_empty());
    assert!(graphs.exprs_between(tv.root(), tv.root(), Exact).unwrap().is_empty());
}

#[test]
fn test_producer_root_reaches_consumer_leaf() {
    let (fusion, t1) = scheduled();
    let graphs = build(&fusion);
    let t0 = fusion.tensors()[0].id();

    let path = graphs.exprs_between(fusion.tensor(t0).root(), fusion.tensor(t1).leaf(), Exact).unwrap();
    assert_eq!(path.len(), 2);
}

#[test]
fn test_cheapest_derivation_wins() {
    let mut fusion = Fusion::new();
    let (a, b) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let m = fusion.merge_ids(a, b);
    let (o, _) = fusion.split_id(m, 2usize, true).unwrap();
    let direct = fusion.merge_ids(a, b);
    let mut graph = graph_over(&fusion, &[a, b, m, o, direct], Exact);
    graph.map_ids(o, direct).unwrap();

    let from: IdGroups = graph.to_id_groups(&[a, b]);
    let to: IdGroups = graph.to_id_groups(&[o]);
    let path = graph.exprs_between(&from, &to).unwrap();

    let direct_merge = graph.find_expr_group(fusion.definition(direct).unwrap().id()).unwrap();
    assert!(path.contains(&direct_merge));
    let split = graph.find_expr_group(fusion.definition(o).unwrap().id()).unwrap();
    assert!(!path.contains(&split));
}
