/// Water-fill assignment of `items` requests across connections with the
/// given in-flight `loads`.
///
/// ## Normative
/// - The result minimizes the maximum per-connection load after
///   assignment: work is poured onto the least-loaded connection first,
///   raising the waterline until everything is placed.
/// - Ties break on the lower index, so the output is deterministic.
#[must_use]
pub fn assign(loads: &[usize], items: usize) -> Vec<usize> {
    let mut give = vec![0usize; loads.len()];
    if loads.is_empty() {
        return give;
    }

    let mut remaining = items;
    while remaining > 0 {
        let i = (0..loads.len())
            .min_by_key(|&i| (loads[i] + give[i], i))
            .unwrap_or(0);
        give[i] += 1;
        remaining -= 1;
    }
    give
}

/// Merge sub-threshold shares into the largest one.
///
/// Per-message overhead makes trivial batches a bad deal, so shares below
/// `min_batch` are folded into the biggest share. When total outstanding
/// work is itself at or below `min_batch` nothing is merged: the tail of a
/// load must not be starved waiting for company.
pub fn merge_small(give: &mut [usize], min_batch: usize) {
    let total: usize = give.iter().sum();
    if total <= min_batch {
        return;
    }

    let Some(largest) = (0..give.len()).max_by_key(|&i| (give[i], usize::MAX - i)) else {
        return;
    };
    for i in 0..give.len() {
        if i != largest && give[i] > 0 && give[i] < min_batch {
            give[largest] += give[i];
            give[i] = 0;
        }
    }
}
