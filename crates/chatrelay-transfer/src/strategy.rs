use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use uuid::Uuid;

/// Picks the next candidate for a round-robin rotation, advancing a shared
/// cursor so repeated calls cycle through `candidates` in order regardless
/// of which candidate was picked last time (agents can come and go between
/// calls without skewing the rotation).
pub fn pick_round_robin(candidates: &[Uuid], cursor: &AtomicUsize) -> Option<Uuid> {
    if candidates.is_empty() {
        return None;
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
    Some(candidates[index])
}

/// Picks the candidate with the fewest currently-assigned open transfers.
/// Ties break toward the first candidate in `candidates`, so the choice is
/// deterministic given the same load snapshot.
pub fn pick_load_balanced(candidates: &[Uuid], loads: &HashMap<Uuid, u32>) -> Option<Uuid> {
    candidates
        .iter()
        .copied()
        .min_by_key(|candidate| loads.get(candidate).copied().unwrap_or(0))
}

/// `Manual` strategy never auto-picks; the caller supplies the agent
/// directly via [`crate::manager::TransferManager::assign_manual`].
pub fn pick_manual() -> Option<Uuid> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_candidates_in_order() {
        let candidates = vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)];
        let cursor = AtomicUsize::new(0);
        let picks: Vec<_> = (0..5)
            .map(|_| pick_round_robin(&candidates, &cursor).unwrap())
            .collect();
        assert_eq!(
            picks,
            vec![
                candidates[0],
                candidates[1],
                candidates[2],
                candidates[0],
                candidates[1],
            ]
        );
    }

    #[test]
    fn round_robin_on_empty_candidates_returns_none() {
        let cursor = AtomicUsize::new(0);
        assert_eq!(pick_round_robin(&[], &cursor), None);
    }

    #[test]
    fn load_balanced_picks_least_loaded_candidate() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        let mut loads = HashMap::new();
        loads.insert(a, 4);
        loads.insert(b, 1);
        loads.insert(c, 9);

        assert_eq!(pick_load_balanced(&[a, b, c], &loads), Some(b));
    }

    #[test]
    fn load_balanced_treats_unseen_candidate_as_zero_load() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut loads = HashMap::new();
        loads.insert(a, 1);

        assert_eq!(pick_load_balanced(&[a, b], &loads), Some(b));
    }
}
