//! Range-table entry identities.
//!
//! The host planner copies and rewrites query trees while it plans them.
//! To tell whether two base-relation entries are copies of the same table
//! reference, every base-relation entry reachable from the statement gets a
//! small integer identity before planning. The identity lives on the entry
//! itself, so every copy carries it along.

use std::collections::BTreeSet;

use crate::interfaces::DistributionCatalog;
use crate::query::{walker, QueryId, QueryTree, RangeTableEntry, RelKind, RteIdentity};

/// Number the base-relation entries reachable from the root 1..N in walker
/// order, replacing any previous identities.
pub fn assign_identities(tree: &mut QueryTree) {
    let refs = walker::base_relation_refs(tree, tree.root());
    for (n, (query, rt_index)) in refs.into_iter().enumerate() {
        let identity = RteIdentity(n as u32 + 1);
        if let Some(relation) = tree
            .query_mut(query)
            .rte_mut(rt_index)
            .and_then(RangeTableEntry::as_relation_mut)
        {
            relation.identity = Some(identity);
        }
    }
}

/// Identity stored on a base-relation entry.
pub fn identity_of(rte: &RangeTableEntry) -> Option<RteIdentity> {
    rte.as_relation().and_then(|relation| relation.identity)
}

/// Identities of every base-relation entry reachable from `query`.
pub fn query_rte_identities(tree: &QueryTree, query: QueryId) -> BTreeSet<RteIdentity> {
    walker::base_relation_refs(tree, query)
        .into_iter()
        .filter_map(|(qid, rt_index)| tree.query(qid).rte(rt_index).and_then(identity_of))
        .collect()
}

/// Toggle expansion of distributed partitioned tables into their
/// partitions. Disabled before the host planner runs so that the parent is
/// planned as a single relation, and re-enabled afterwards.
pub fn adjust_partition_expansion(tree: &mut QueryTree, catalog: &dyn DistributionCatalog, expand: bool) {
    let refs = walker::base_relation_refs(tree, tree.root());
    for (query, rt_index) in refs {
        let Some(relation) = tree
            .query_mut(query)
            .rte_mut(rt_index)
            .and_then(RangeTableEntry::as_relation_mut)
        else {
            continue;
        };
        if !catalog.is_distributed(relation.relation_id)
            || !catalog.is_partitioned_table(relation.relation_id)
        {
            continue;
        }
        relation.inherit = expand;
        relation.relkind = if expand {
            RelKind::PartitionedTable
        } else {
            RelKind::Table
        };
    }
}
