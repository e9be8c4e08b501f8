use indexmap::IndexSet;
use test_case::test_case;

use kiln_ir::{Extent, Fusion, IterType, SwizzleMode, SwizzleType};

use crate::test::helpers::{graph_over, partition};
use crate::{Error, IdGraph, IdMappingMode};

#[test]
fn test_initialize_creates_singletons() {
    let mut fusion = Fusion::new();
    let ids: Vec<_> = (0..3).map(|_| fusion.new_iter_domain(4usize, IterType::Iteration)).collect();
    let graph = graph_over(&fusion, &ids, IdMappingMode::Exact);

    for id in &ids {
        let group = graph.find_group(*id).unwrap();
        assert_eq!(graph.members(group).len(), 1);
        assert!(graph.members(group).contains(id));
    }
    assert!(!graph.are_mapped(ids[0], ids[1]));
    assert!(graph.are_mapped(ids[0], ids[0]));
}

#[test]
fn test_map_ids_propagates_through_matching_merges() {
    let mut fusion = Fusion::new();
    let (i0, i1) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let (j0, j1) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let m = fusion.merge_ids(i0, i1);
    let n = fusion.merge_ids(j0, j1);
    let mut graph = graph_over(&fusion, &[i0, i1, j0, j1, m, n], IdMappingMode::Exact);

    graph.map_ids(i0, j0).unwrap();
    assert!(!graph.are_mapped(m, n), "one operand is not enough");
    graph.map_ids(i1, j1).unwrap();

    assert!(graph.are_mapped(m, n));
    let (em, en) = (fusion.definition(m).unwrap().id(), fusion.definition(n).unwrap().id());
    assert_eq!(graph.find_expr_group(em), graph.find_expr_group(en));
}

#[test]
fn test_map_ids_order_does_not_matter() {
    let mut fusion = Fusion::new();
    let ids: Vec<_> = (0..4).map(|_| fusion.new_iter_domain(Extent::var("N"), IterType::Iteration)).collect();
    let m = fusion.merge_ids(ids[0], ids[1]);
    let n = fusion.merge_ids(ids[2], ids[3]);
    let all = [ids.clone(), vec![m, n]].concat();

    let mut forward = graph_over(&fusion, &all, IdMappingMode::Exact);
    forward.map_ids(ids[0], ids[2]).unwrap();
    forward.map_ids(ids[1], ids[3]).unwrap();

    let mut backward = graph_over(&fusion, &all, IdMappingMode::Exact);
    backward.map_ids(ids[3], ids[1]).unwrap();
    backward.map_ids(ids[2], ids[0]).unwrap();

    assert_eq!(partition(&forward), partition(&backward));
}

#[test]
fn test_splits_with_different_factors_do_not_match() {
    let mut fusion = Fusion::new();
    let (a, b) = (fusion.new_iter_domain(16usize, IterType::Iteration), fusion.new_iter_domain(16usize, IterType::Iteration));
    let (ao, ai) = fusion.split_id(a, 4usize, true).unwrap();
    let (bo, bi) = fusion.split_id(b, 2usize, true).unwrap();
    let mut graph = graph_over(&fusion, &[a, b, ao, ai, bo, bi], IdMappingMode::Exact);

    graph.map_ids(a, b).unwrap();
    assert!(!graph.are_mapped(ao, bo));
    assert!(!graph.are_mapped(ai, bi));
}

#[test]
fn test_backward_merge_needs_an_agreeing_operand() {
    let mut fusion = Fusion::new();
    let mk = |fusion: &mut Fusion, o: usize, i: usize| {
        let (outer, inner) = (fusion.new_iter_domain(o, IterType::Iteration), fusion.new_iter_domain(i, IterType::Iteration));
        (outer, inner, fusion.merge_ids(outer, inner))
    };
    let (a0, a1, am) = mk(&mut fusion, 4, 8);
    let (b0, b1, bm) = mk(&mut fusion, 8, 4);
    let (c0, c1, cm) = mk(&mut fusion, 4, 8);
    let mut graph = graph_over(&fusion, &[a0, a1, am, b0, b1, bm, c0, c1, cm], IdMappingMode::Exact);

    graph.map_ids(am, bm).unwrap();
    assert!(!graph.are_mapped(a0, b0));
    assert!(!graph.are_mapped(a1, b1));

    graph.map_ids(am, cm).unwrap();
    assert!(graph.are_mapped(a0, c0));
    assert!(graph.are_mapped(a1, c1));
}

#[test]
fn test_operand_mapped_after_products_still_splits_back() {
    let mut fusion = Fusion::new();
    let [a0, a1, b0, b1] = ["N", "M", "K", "L"].map(|name| fusion.new_iter_domain(Extent::var(name), IterType::Iteration));
    let am = fusion.merge_ids(a0, a1);
    let bm = fusion.merge_ids(b0, b1);
    let all = [a0, a1, am, b0, b1, bm];

    let mut products_first = graph_over(&fusion, &all, IdMappingMode::Exact);
    products_first.map_ids(am, bm).unwrap();
    assert!(!products_first.are_mapped(a1, b1));
    products_first.map_ids(a0, b0).unwrap();

    let mut operands_first = graph_over(&fusion, &all, IdMappingMode::Exact);
    operands_first.map_ids(a0, b0).unwrap();
    operands_first.map_ids(am, bm).unwrap();

    assert!(products_first.are_mapped(a1, b1));
    assert!(operands_first.are_mapped(a1, b1));
    assert_eq!(partition(&products_first), partition(&operands_first));
    let (ea, eb) = (fusion.definition(am).unwrap().id(), fusion.definition(bm).unwrap().id());
    assert!(products_first.exprs_are_mapped(ea, eb));
}

#[test]
fn test_exact_never_maps_broadcast_through_a_merge() {
    let mut fusion = Fusion::new();
    let (x0, xb) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(1usize, IterType::Broadcast));
    let (y0, y1) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(1usize, IterType::Iteration));
    let xm = fusion.merge_ids(x0, xb);
    let ym = fusion.merge_ids(y0, y1);
    let all = [x0, xb, xm, y0, y1, ym];

    let mut exact = graph_over(&fusion, &all, IdMappingMode::Exact);
    exact.map_ids(xm, ym).unwrap();
    assert!(!exact.are_mapped(xb, y1));
    assert!(!exact.are_mapped(x0, y0));

    let mut permissive = graph_over(&fusion, &all, IdMappingMode::Permissive);
    permissive.map_ids(xm, ym).unwrap();
    assert!(permissive.are_mapped(xb, y1));
    assert!(permissive.are_mapped(x0, y0));
}

#[test]
fn test_add_transform_follows_matching_consumer() {
    let mut fusion = Fusion::new();
    let (a, b) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let m = fusion.merge_ids(a, b);
    let merge = fusion.definition(m).unwrap().id();
    let replay = fusion.replay_expr(merge, &[a, b]).unwrap();
    let out = fusion.expr(replay).outputs()[0];
    let (x, y) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let stray = fusion.replay_expr(merge, &[x, y]).unwrap();

    let mut graph = IdGraph::new(&fusion, IdMappingMode::Exact, 64);
    for id in [a, b] {
        graph.initialize_id(id, IndexSet::new(), IndexSet::from([merge]));
    }
    graph.initialize_id(m, IndexSet::from([merge]), IndexSet::new());

    graph.add_transform(replay).unwrap();
    assert!(graph.are_mapped(out, m));
    assert!(graph.exprs_are_mapped(merge, replay));
    assert_eq!(graph.uses(a).unwrap().len(), 2);
    assert_eq!(graph.definitions(out), Some(&IndexSet::from([replay])));

    assert_eq!(graph.add_transform(stray).unwrap_err(), Error::IdNotInGraph { id: x, mode: IdMappingMode::Exact });
    assert!(graph.find_expr_group(stray).is_none());
}

#[test_case(true ; "inner split maps outer")]
#[test_case(false ; "outer split maps inner")]
fn test_trivial_split(inner_split: bool) {
    let mut fusion = Fusion::new();
    let id = fusion.new_iter_domain(Extent::var("N"), IterType::Iteration);
    let (outer, inner) = fusion.split_id(id, 1usize, inner_split).unwrap();
    let expr = fusion.definition(outer).unwrap();

    let pairs = IdGraph::is_trivial_expr(&fusion, expr);
    let expected = if inner_split { outer } else { inner };
    assert_eq!(pairs.as_slice(), &[(id, expected)]);
}

#[test]
fn test_trivial_merge_and_swizzle() {
    let mut fusion = Fusion::new();
    let n = fusion.new_iter_domain(Extent::var("N"), IterType::Iteration);
    let one = fusion.new_iter_domain(1usize, IterType::Broadcast);
    let m = fusion.merge_ids(n, one);
    assert_eq!(IdGraph::is_trivial_expr(&fusion, fusion.definition(m).unwrap()).as_slice(), &[(n, m)]);

    let (x, y) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(4usize, IterType::Iteration));
    let (sx, sy) = fusion.swizzle_ids(x, y, SwizzleType::NoSwizzle, SwizzleMode::Data);
    assert_eq!(IdGraph::is_trivial_expr(&fusion, fusion.definition(sx).unwrap()).as_slice(), &[(x, sx), (y, sy)]);

    let (zx, _) = fusion.swizzle_ids(x, y, SwizzleType::ZShape, SwizzleMode::Data);
    assert!(IdGraph::is_trivial_expr(&fusion, fusion.definition(zx).unwrap()).is_empty());
}

#[test]
fn test_loop_swizzles_map_inputs_to_outputs() {
    let mut fusion = Fusion::new();
    let (x, y) = (fusion.new_iter_domain(8usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let (lx, ly) = fusion.swizzle_ids(x, y, SwizzleType::ZShape, SwizzleMode::Loop);
    let (dx, _) = fusion.swizzle_ids(lx, ly, SwizzleType::Xor, SwizzleMode::Data);
    let mut graph = graph_over(&fusion, &[x, y, lx, ly, dx], IdMappingMode::Exact);

    graph.map_through_loop_swizzles().unwrap();
    assert!(graph.are_mapped(x, lx));
    assert!(graph.are_mapped(y, ly));
    assert!(!graph.are_mapped(lx, dx));
}

#[test]
fn test_definitions_uses_and_closures() {
    let mut fusion = Fusion::new();
    let (a, b) = (fusion.new_iter_domain(4usize, IterType::Iteration), fusion.new_iter_domain(8usize, IterType::Iteration));
    let m = fusion.merge_ids(a, b);
    let (o, i) = fusion.split_id(m, 2usize, true).unwrap();
    let graph = graph_over(&fusion, &[a, b, m, o, i], IdMappingMode::Exact);

    let merge = graph.find_expr_group(fusion.definition(m).unwrap().id()).unwrap();
    let split = graph.find_expr_group(fusion.definition(o).unwrap().id()).unwrap();
    let g = |id| graph.find_group(id).unwrap();

    assert_eq!(graph.input_groups(merge), vec![g(a), g(b)]);
    assert_eq!(graph.output_groups(split), vec![g(o), g(i)]);
    assert!(graph.unique_definitions(g(m)).contains(&merge));
    assert!(graph.unique_uses(g(m)).contains(&split));
    assert!(graph.unique_definitions(g(a)).is_empty());

    let uses = graph.all_uses_of(&[g(a)].into_iter().collect());
    assert_eq!(uses.into_iter().collect::<Vec<_>>(), vec![merge, split]);
    let defs = graph.all_definitions_of(&[g(i)].into_iter().collect());
    assert!(defs.contains(&merge) && defs.contains(&split));
}

#[test]
fn test_build_map_between_keeps_target_order() {
    let mut fusion = Fusion::new();
    let ids: Vec<_> = (0..4).map(|_| fusion.new_iter_domain(4usize, IterType::Iteration)).collect();
    let mut graph = graph_over(&fusion, &ids, IdMappingMode::Exact);
    graph.map_ids(ids[0], ids[3]).unwrap();
    graph.map_ids(ids[0], ids[2]).unwrap();

    let map = graph.build_map_between(&ids[..2], &ids[2..]);
    assert_eq!(map[&ids[0]], vec![ids[2], ids[3]]);
    assert!(map[&ids[1]].is_empty());
}

#[test]
fn test_map_unknown_id_fails() {
    let mut fusion = Fusion::new();
    let a = fusion.new_iter_domain(4usize, IterType::Iteration);
    let b = fusion.new_iter_domain(4usize, IterType::Iteration);
    let mut graph = graph_over(&fusion, &[a], IdMappingMode::Exact);

    assert!(graph.find_group(b).is_none());
    assert!(matches!(graph.map_ids(a, b), Err(Error::IdNotInGraph { id, .. }) if id == b));
}

#[test]
fn test_propagation_limit() {
    let mut fusion = Fusion::new();
    let ids: Vec<_> = (0..4).map(|_| fusion.new_iter_domain(4usize, IterType::Iteration)).collect();
    let m = fusion.merge_ids(ids[0], ids[1]);
    let n = fusion.merge_ids(ids[2], ids[3]);

    let mut graph = IdGraph::new(&fusion, IdMappingMode::Exact, 1);
    for id in [ids.clone(), vec![m, n]].concat() {
        let definitions = fusion.definition(id).map(|expr| expr.id()).into_iter().collect();
        let uses = fusion.exprs().iter().filter(|expr| expr.inputs().contains(&id)).map(|expr| expr.id()).collect();
        graph.initialize_id(id, definitions, uses);
    }

    graph.map_ids(ids[0], ids[2]).unwrap();
    let err = graph.map_ids(ids[1], ids[3]).unwrap_err();
    assert!(matches!(err, Error::PropagationLimitExceeded { limit: 1, .. }));
}

#[test]
fn test_map_through_expr() {
    let mut fusion = Fusion::new();
    let (a, b) = (fusion.new_iter_domain(16usize, IterType::Iteration), fusion.new_iter_domain(16usize, IterType::Iteration));
    let (ao, ai) = fusion.split_id(a, 4usize, true).unwrap();
    let (bo, bi) = fusion.split_id(b, 4usize, true).unwrap();
    let (sa, sb) = (fusion.definition(ao).unwrap().id(), fusion.definition(bo).unwrap().id());
    let mut graph = graph_over(&fusion, &[a, b, ao, ai, bo, bi], IdMappingMode::Exact);

    assert!(!graph.map_through_expr(sa, sb, true).unwrap(), "inputs are not mapped yet");
    assert!(graph.map_through_expr(sa, sb, false).is_ok_and(|mapped| !mapped));

    graph.map_ids(a, b).unwrap();
    assert!(graph.are_mapped(ao, bo) && graph.are_mapped(ai, bi));
    assert!(graph.exprs_are_mapped(sa, sb));
}

#[test]
fn test_concrete_id_prefers_non_broadcast() {
    let mut fusion = Fusion::new();
    let b = fusion.new_iter_domain(1usize, IterType::Broadcast);
    let i = fusion.new_iter_domain(8usize, IterType::Iteration);
    let mut graph = graph_over(&fusion, &[b, i], IdMappingMode::Permissive);
    graph.map_ids(b, i).unwrap();

    let group = graph.find_group(b).unwrap();
    assert_eq!(graph.concrete_id(group), Some(i));
}

#[test]
fn test_display_lists_groups() {
    let mut fusion = Fusion::new();
    let a = fusion.new_iter_domain(4usize, IterType::Iteration);
    let b = fusion.new_iter_domain(4usize, IterType::Iteration);
    let mut graph = graph_over(&fusion, &[a, b], IdMappingMode::AlmostExact);
    graph.map_ids(a, b).unwrap();

    let rendered = graph.to_string();
    assert!(rendered.starts_with("ALMOST_EXACT graph:"));
    assert!(rendered.contains(&format!("{{{a}, {b}}}")));
}
