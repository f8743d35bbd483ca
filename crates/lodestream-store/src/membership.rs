use std::collections::HashSet;

use lodestream_core::AssetHash;
use tracing::debug;

/// Sorted-key offset probed to extrapolate the total key count.
const PROBE_OFFSET: usize = 256;

/// Estimated counts at or below this materialize the full hash set.
const FULL_LOAD_MAX: u64 = 65_536;

/// Verdict of an approximate membership test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipVerdict {
    /// The hash is provably not in the store; skip the lookup.
    DefinitelyAbsent,
    /// The hash may be in the store; a real lookup is required.
    PossiblyPresent,
}

/// Approximate membership over the store's key space.
///
/// The store's keys are uniformly distributed content digests, so the
/// `PROBE_OFFSET`-th smallest key's 16-bit prefix extrapolates the total
/// key count without walking the whole key space. When the extrapolated
/// count is small the full set is materialized and absence becomes exact;
/// otherwise every probe answers [`MembershipVerdict::PossiblyPresent`].
///
/// ## Normative
/// - Only `DefinitelyAbsent` conclusions may be trusted: the snapshot goes
///   stale as soon as the store evicts or admits entries independently, so
///   `PossiblyPresent` is never a promise of a hit.
#[derive(Clone, Debug)]
pub struct MembershipEstimate {
    known: Option<HashSet<AssetHash>>,
    estimated_count: u64,
}

impl MembershipEstimate {
    /// Build from the store's hashes in sorted order.
    #[must_use]
    pub fn from_sorted(sorted: &[AssetHash]) -> Self {
        if sorted.len() < PROBE_OFFSET {
            return Self {
                known: Some(sorted.iter().copied().collect()),
                estimated_count: sorted.len() as u64,
            };
        }

        // K-th smallest key with 16-bit prefix p in a uniform hash space
        // implies roughly K * 65536 / (p + 1) keys in total.
        let prefix = u64::from(sorted[PROBE_OFFSET - 1].prefix16());
        let estimated = (PROBE_OFFSET as u64).saturating_mul(65_536) / (prefix + 1);
        debug!(estimated, probe_prefix = prefix, "membership estimate");

        if estimated <= FULL_LOAD_MAX {
            Self {
                known: Some(sorted.iter().copied().collect()),
                estimated_count: estimated,
            }
        } else {
            Self {
                known: None,
                estimated_count: estimated,
            }
        }
    }

    /// Empty estimate: every probe is `DefinitelyAbsent`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            known: Some(HashSet::new()),
            estimated_count: 0,
        }
    }

    #[must_use]
    pub fn estimated_count(&self) -> u64 {
        self.estimated_count
    }

    #[must_use]
    pub fn check(&self, hash: &AssetHash) -> MembershipVerdict {
        match &self.known {
            Some(set) if !set.contains(hash) => MembershipVerdict::DefinitelyAbsent,
            _ => MembershipVerdict::PossiblyPresent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digests(n: usize) -> Vec<AssetHash> {
        let mut v: Vec<AssetHash> = (0..n)
            .map(|i| AssetHash::digest(&(i as u64).to_le_bytes()))
            .collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn small_store_is_exact() {
        let sorted = digests(100);
        let est = MembershipEstimate::from_sorted(&sorted);

        assert_eq!(est.estimated_count(), 100);
        assert_eq!(est.check(&sorted[0]), MembershipVerdict::PossiblyPresent);
        assert_eq!(
            est.check(&AssetHash::digest(b"never stored")),
            MembershipVerdict::DefinitelyAbsent
        );
    }

    #[test]
    fn probe_extrapolates_within_a_factor_of_two() {
        let n = 10_000;
        let est = MembershipEstimate::from_sorted(&digests(n));

        let count = est.estimated_count();
        assert!(count >= (n as u64) / 2, "estimate {count} too low");
        assert!(count <= (n as u64) * 2, "estimate {count} too high");
    }

    #[test]
    fn present_hash_is_never_reported_absent() {
        let sorted = digests(10_000);
        let est = MembershipEstimate::from_sorted(&sorted);

        for hash in sorted.iter().step_by(997) {
            assert_eq!(est.check(hash), MembershipVerdict::PossiblyPresent);
        }
    }

    #[test]
    fn empty_estimate_rejects_everything() {
        let est = MembershipEstimate::empty();
        assert_eq!(
            est.check(&AssetHash::digest(b"anything")),
            MembershipVerdict::DefinitelyAbsent
        );
    }
}
