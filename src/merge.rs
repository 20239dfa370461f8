//! Deduplicating merge of harvested items
//!
//! Pure function, no I/O. The orchestrator calls this after every page so a
//! crash between merge and checkpoint can always be recovered by re-fetching
//! the same page: merging the same items again is a no-op.

use crate::harvest::HarvestedItem;
use std::collections::BTreeSet;

/// Merges freshly fetched items into the already-collected sequence
///
/// Existing items keep their order; new items whose identity key has not been
/// seen are appended in fetch order; the rest are dropped.
///
/// # Arguments
///
/// * `existing` - Items collected so far, unique by identity key
/// * `seen` - Identity keys of all items in `existing`
/// * `fetched` - Newly fetched items, possibly overlapping with `existing`
///
/// # Returns
///
/// The merged item sequence and the updated key set.
pub fn merge(
    existing: Vec<HarvestedItem>,
    seen: BTreeSet<String>,
    fetched: Vec<HarvestedItem>,
) -> (Vec<HarvestedItem>, BTreeSet<String>) {
    let mut items = existing;
    let mut keys = seen;

    for item in fetched {
        let key = item.identity_key();
        if keys.insert(key) {
            items.push(item);
        } else {
            tracing::debug!("Dropping duplicate item: {}", item.identity_key());
        }
    }

    (items, keys)
}

/// Rebuilds the seen-key set from a persisted item sequence
///
/// Used at resume time so deduplication holds even when the persisted cursor
/// predates some of the persisted items.
pub fn keys_of(items: &[HarvestedItem]) -> BTreeSet<String> {
    items.iter().map(|item| item.identity_key()).collect()
}
