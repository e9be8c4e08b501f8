//! Iteration dimensions.

use std::fmt;

use crate::extent::Extent;
use crate::types::{ExprId, IterDomainId, IterType, ParallelType};

/// One axis of a tensor's iteration space.
///
/// Iteration domains are created by the [`Fusion`](crate::Fusion) and referenced by
/// [`IterDomainId`] everywhere else. Apart from the parallel binding, which scheduling
/// may change, they are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterDomain {
    pub(crate) id: IterDomainId,
    pub(crate) extent: Extent,
    pub(crate) iter_type: IterType,
    pub(crate) parallel_type: ParallelType,
    /// Produced by a transform between a tensor's root and rfactor domains.
    pub(crate) is_rfactor_product: bool,
    pub(crate) definition: Option<ExprId>,
}

impl IterDomain {
    pub fn id(&self) -> IterDomainId {
        self.id
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn iter_type(&self) -> IterType {
        self.iter_type
    }

    pub fn parallel_type(&self) -> ParallelType {
        self.parallel_type
    }

    /// The transform that produced this dimension, if any.
    pub fn definition(&self) -> Option<ExprId> {
        self.definition
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type == IterType::Broadcast
    }

    pub fn is_reduction(&self) -> bool {
        self.iter_type == IterType::Reduction
    }

    pub fn is_parallelized(&self) -> bool {
        self.parallel_type.is_parallel()
    }

    pub fn is_rfactor_product(&self) -> bool {
        self.is_rfactor_product
    }
}

impl fmt::Display for IterDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{{{}}}", self.iter_type, self.id.0, self.extent)?;
        if self.parallel_type.is_parallel() {
            write!(f, ":{}", self.parallel_type)?;
        }
        if self.is_rfactor_product {
            write!(f, "rf")?;
        }
        Ok(())
    }
}
