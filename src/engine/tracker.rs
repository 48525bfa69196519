//! Batch selection over discovered and finished units.

use std::collections::BTreeSet;

/// Next batch: the `batch_size` smallest units in `discovered` that are not in `finished`,
/// ascending and without duplicates. Shorter when fewer remain; empty when none do.
///
/// Pure: identical inputs always yield the identical batch.
pub fn next_batch<U: Ord + Clone>(
    discovered: &[U],
    finished: &BTreeSet<U>,
    batch_size: usize,
) -> Vec<U> {
    let pending: BTreeSet<&U> = discovered
        .iter()
        .filter(|u| !finished.contains(*u))
        .collect();
    pending.into_iter().take(batch_size).cloned().collect()
}

/// Units discovered but not yet handed to the task.
pub fn available(discovered_len: usize, finished_len: usize) -> usize {
    discovered_len.saturating_sub(finished_len)
}
