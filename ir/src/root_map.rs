//! Producer-to-consumer root dimension correspondence.

use snafu::ensure;

use crate::error::{InvalidPermutationSnafu, RankMismatchSnafu, Result};
use crate::fusion::Fusion;
use crate::tensor::TensorOpKind;
use crate::types::{IterDomainId, TensorId, TensorOpId};

/// Pair the producer's maybe-rfactor dimensions with the consumer's root dimensions.
///
/// Returns `(producer_id, consumer_id)` pairs in consumer root order. Reduction
/// dimensions of the producer are never paired, and neither are broadcast dimensions
/// that the op introduces in the consumer. Pairs may join a broadcast dimension with a
/// non-broadcast one; callers that need exact equivalence filter those out.
///
/// ```
/// # use kiln_ir::{Fusion, pairwise_root_map};
/// let mut fusion = Fusion::new();
/// let t0 = fusion.add_tensor("T", [4usize, 8]);
/// let t1 = fusion.permute(t0, &[1, 0], "T").unwrap();
/// let op = fusion.tensor_op_ids()[0];
///
/// let pairs = pairwise_root_map(&fusion, op, t0, t1).unwrap();
/// assert_eq!(pairs[0], (fusion.tensor(t0).root()[1], fusion.tensor(t1).root()[0]));
/// ```
pub fn pairwise_root_map(
    fusion: &Fusion,
    op: TensorOpId,
    producer: TensorId,
    consumer: TensorId,
) -> Result<Vec<(IterDomainId, IterDomainId)>> {
    let producer_dims = fusion.producer_dims(producer);
    let consumer_root = fusion.tensor(consumer).root();

    let consumer_dims: Vec<IterDomainId> = match fusion.tensor_op(op).kind() {
        TensorOpKind::Broadcast { is_new } => consumer_root
            .iter()
            .zip(is_new.iter().chain(std::iter::repeat(&false)))
            .filter_map(|(id, new)| (!new).then_some(*id))
            .collect(),
        _ => consumer_root.to_vec(),
    };

    ensure!(
        producer_dims.len() == consumer_dims.len(),
        RankMismatchSnafu {
            producer,
            producer_rank: producer_dims.len(),
            consumer,
            consumer_rank: consumer_dims.len(),
        }
    );

    let pairs = match fusion.tensor_op(op).kind() {
        TensorOpKind::Permute { new2old } => {
            let rank = producer_dims.len();
            ensure!(
                new2old.len() == rank && new2old.iter().all(|old| *old < rank),
                InvalidPermutationSnafu { tensor: consumer, permutation: new2old.clone(), rank }
            );
            new2old.iter().zip(&consumer_dims).map(|(old, c)| (producer_dims[*old], *c)).collect()
        }
        _ => producer_dims.into_iter().zip(consumer_dims).collect(),
    };
    Ok(pairs)
}
