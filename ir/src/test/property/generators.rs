//! Generators for property-based testing.
//!
//! Random fusions are built from a short list of [`FusionStep`]s applied to a growing
//! pool of tensors. Steps that do not fit the tensor they land on (rank mismatch,
//! out-of-range axis, ...) are skipped, so every generated fusion is well formed.

use proptest::prelude::*;

use crate::{Extent, Fusion, TensorId};

/// One construction or scheduling step. Indices are taken modulo the pool size.
#[derive(Debug, Clone)]
pub enum FusionStep {
    Unary { src: usize },
    Binary { lhs: usize, rhs: usize },
    Broadcast { src: usize, position: usize },
    Reduction { src: usize, axis: usize },
    Permute { src: usize, rotate: usize },
    View { src: usize, axis: usize },
    Split { tv: usize, axis: usize, factor: usize, inner_split: bool },
    Merge { tv: usize, axis: usize },
    ComputeAt { tv: usize, position: usize },
}

// ============================================================================
// Extent Generators
// ============================================================================

/// Small constant or one of two symbolic sizes.
pub fn arb_extent() -> impl Strategy<Value = Extent> {
    prop_oneof![
        3 => (1usize..=8).prop_map(Extent::Const),
        1 => Just(Extent::var("N")),
        1 => Just(Extent::var("M")),
    ]
}

// ============================================================================
// Step and Fusion Generators
// ============================================================================

pub fn arb_step() -> impl Strategy<Value = FusionStep> {
    let idx = || 0usize..8;
    prop_oneof![
        3 => idx().prop_map(|src| FusionStep::Unary { src }),
        3 => (idx(), idx()).prop_map(|(lhs, rhs)| FusionStep::Binary { lhs, rhs }),
        2 => (idx(), idx()).prop_map(|(src, position)| FusionStep::Broadcast { src, position }),
        1 => (idx(), idx()).prop_map(|(src, axis)| FusionStep::Reduction { src, axis }),
        1 => (idx(), 1usize..3).prop_map(|(src, rotate)| FusionStep::Permute { src, rotate }),
        1 => (idx(), idx()).prop_map(|(src, axis)| FusionStep::View { src, axis }),
        3 => (idx(), idx(), 1usize..=4, any::<bool>())
            .prop_map(|(tv, axis, factor, inner_split)| FusionStep::Split { tv, axis, factor, inner_split }),
        2 => (idx(), idx()).prop_map(|(tv, axis)| FusionStep::Merge { tv, axis }),
        2 => (idx(), idx()).prop_map(|(tv, position)| FusionStep::ComputeAt { tv, position }),
    ]
}

/// A fusion with two same-shaped inputs and up to `max_steps` further steps.
pub fn arb_fusion(max_steps: usize) -> impl Strategy<Value = Fusion> {
    (prop::collection::vec(arb_extent(), 1..=3), prop::collection::vec(arb_step(), 0..=max_steps))
        .prop_map(|(extents, steps)| build_fusion(&extents, &steps))
}

pub fn build_fusion(extents: &[Extent], steps: &[FusionStep]) -> Fusion {
    let mut fusion = Fusion::new();
    let mut tensors = vec![
        fusion.add_tensor("T0", extents.iter().cloned()),
        fusion.add_tensor("T1", extents.iter().cloned()),
    ];
    for step in steps {
        apply_step(&mut fusion, &mut tensors, step);
    }
    fusion
}

/// Apply `step`, pushing any newly created tensor onto `tensors`.
pub fn apply_step(fusion: &mut Fusion, tensors: &mut Vec<TensorId>, step: &FusionStep) {
    let pick = |i: usize| tensors[i % tensors.len()];
    let name = format!("T{}", tensors.len());

    let created = match *step {
        FusionStep::Unary { src } => Some(fusion.unary(pick(src), name)),
        FusionStep::Binary { lhs, rhs } => fusion.binary(pick(lhs), pick(rhs), name).ok(),
        FusionStep::Broadcast { src, position } => {
            let rank = fusion.producer_dims(pick(src)).len();
            let mut is_new = vec![false; rank + 1];
            is_new[position % (rank + 1)] = true;
            fusion.broadcast(pick(src), &is_new, name).ok()
        }
        FusionStep::Reduction { src, axis } => {
            let rank = fusion.producer_dims(pick(src)).len();
            (rank > 0).then(|| fusion.reduction(pick(src), &[axis % rank], name).ok()).flatten()
        }
        FusionStep::Permute { src, rotate } => {
            let rank = fusion.producer_dims(pick(src)).len();
            let new2old: Vec<usize> = (0..rank).map(|i| (i + rotate) % rank).collect();
            (rank > 1).then(|| fusion.permute(pick(src), &new2old, name).ok()).flatten()
        }
        FusionStep::View { src, axis } => {
            let rank = fusion.producer_dims(pick(src)).len();
            (rank > 1).then(|| fusion.view_merge(pick(src), axis % (rank - 1), name).ok()).flatten()
        }
        FusionStep::Split { tv, axis, factor, inner_split } => {
            let rank = fusion.tensor(pick(tv)).leaf().len();
            if rank > 0 {
                fusion.split(pick(tv), axis % rank, factor, inner_split).ok();
            }
            None
        }
        FusionStep::Merge { tv, axis } => {
            let rank = fusion.tensor(pick(tv)).leaf().len();
            if rank > 1 {
                fusion.merge(pick(tv), axis % (rank - 1)).ok();
            }
            None
        }
        FusionStep::ComputeAt { tv, position } => {
            let rank = fusion.tensor(pick(tv)).leaf().len();
            fusion.compute_at(pick(tv), position % (rank + 1)).ok();
            None
        }
    };

    if let Some(tv) = created {
        tensors.push(tv);
    }
}
