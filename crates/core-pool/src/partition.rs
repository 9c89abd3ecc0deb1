//! Partition keys and transaction identifiers

use crate::config::PartitionStrategy;
use crate::factory::ResourceFactory;
use std::fmt;

/// Partition key for the principal and criteria types of factory `F`
pub type PoolKey<F> =
    PartitionKey<<F as ResourceFactory>::Principal, <F as ResourceFactory>::Criteria>;

/// Identity of the sub-pool a request is routed to
///
/// Fields not selected by the [`PartitionStrategy`] are `None`, so requests
/// that differ only in those fields share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey<P, C> {
    principal: Option<P>,
    criteria: Option<C>,
    separate_no_tx: bool,
}

impl<P: Clone, C: Clone> PartitionKey<P, C> {
    /// Derive the key for a request
    pub fn new(
        strategy: PartitionStrategy,
        principal: Option<&P>,
        criteria: &C,
        separate_no_tx: bool,
    ) -> Self {
        Self {
            principal: if strategy.uses_principal() {
                principal.cloned()
            } else {
                None
            },
            criteria: strategy.uses_criteria().then(|| criteria.clone()),
            separate_no_tx,
        }
    }
}

impl<P, C> PartitionKey<P, C> {
    /// Key of a standalone pool that is not partitioned at all
    pub fn unpartitioned() -> Self {
        Self {
            principal: None,
            criteria: None,
            separate_no_tx: false,
        }
    }

    /// Principal this partition is bound to, if any
    pub fn principal(&self) -> Option<&P> {
        self.principal.as_ref()
    }

    /// Criteria this partition is bound to, if any
    pub fn criteria(&self) -> Option<&C> {
        self.criteria.as_ref()
    }

    /// Whether this is the non-transactional side of a split partition
    pub fn is_separate_no_tx(&self) -> bool {
        self.separate_no_tx
    }
}

/// Identifier of an active transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        TransactionId(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}
