//! Load-balancing strategies.
//!
//! A strategy only ranks candidates; circuit-breaker gating and the
//! prefer-local override live in the invoker. The candidate list handed to
//! [`Strategy::pick`] is always sorted by node id, which makes the
//! round-robin rotation deterministic.

use std::collections::HashMap;

use rand::Rng;

use crate::registry::ServiceInstance;

/// Pluggable selection policy over the eligible instances of a service.
///
/// The set of variants is closed: the configuration resolver only constructs
/// what is listed here.
#[derive(Debug, Clone)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    Random(Random),
}

impl Strategy {
    pub fn round_robin() -> Self {
        Strategy::RoundRobin(RoundRobin::default())
    }

    pub fn random() -> Self {
        Strategy::Random(Random)
    }

    /// Adapter-type name, as used by the configuration resolver.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin(_) => "RoundRobin",
            Strategy::Random(_) => "Random",
        }
    }

    /// Picks one instance from a non-empty candidate list.
    pub fn pick<'a>(
        &mut self,
        service: &str,
        candidates: &'a [ServiceInstance],
    ) -> Option<&'a ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            Strategy::RoundRobin(round_robin) => Some(round_robin.pick(service, candidates)),
            Strategy::Random(random) => Some(random.pick(candidates)),
        }
    }
}

/// Rotating cursor per service name.
///
/// The cursor is clamped whenever the candidate list shrank between picks, so
/// it never indexes out of range.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    cursors: HashMap<String, usize>,
}

impl RoundRobin {
    fn pick<'a>(&mut self, service: &str, candidates: &'a [ServiceInstance]) -> &'a ServiceInstance {
        let cursor = self.cursors.entry(service.to_string()).or_insert(0);
        if *cursor >= candidates.len() {
            *cursor = 0;
        }
        let picked = &candidates[*cursor];
        *cursor = (*cursor + 1) % candidates.len();
        picked
    }
}

/// Uniform pick from the thread RNG (seeded from OS entropy, never a fixed
/// seed).
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Random {
    fn pick<'a>(&self, candidates: &'a [ServiceInstance]) -> &'a ServiceInstance {
        let index = rand::thread_rng().gen_range(0..candidates.len());
        &candidates[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::collections::HashSet;

    fn instances(node_ids: &[&str]) -> Vec<ServiceInstance> {
        node_ids
            .iter()
            .map(|node_id| ServiceInstance {
                service: "math".to_string(),
                node_id: node_id.to_string(),
                actions: BTreeSet::from(["add".to_string()]),
            })
            .collect()
    }

    #[test]
    fn test_round_robin_cycles_deterministically() {
        let mut strategy = Strategy::round_robin();
        let candidates = instances(&["a", "b", "c"]);

        let picks: Vec<String> = (0..6)
            .map(|_| strategy.pick("math", &candidates).unwrap().node_id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_cursor_per_service() {
        let mut strategy = Strategy::round_robin();
        let math = instances(&["a", "b"]);
        let users = instances(&["a", "b"]);

        assert_eq!(strategy.pick("math", &math).unwrap().node_id, "a");
        // A different service starts its own rotation
        assert_eq!(strategy.pick("users", &users).unwrap().node_id, "a");
        assert_eq!(strategy.pick("math", &math).unwrap().node_id, "b");
    }

    #[test]
    fn test_round_robin_clamps_when_list_shrinks() {
        let mut strategy = Strategy::round_robin();
        let three = instances(&["a", "b", "c"]);
        strategy.pick("math", &three);
        strategy.pick("math", &three);
        // Cursor now points at index 2; the list shrinks to one entry
        let one = instances(&["a"]);
        assert_eq!(strategy.pick("math", &one).unwrap().node_id, "a");
    }

    #[test]
    fn test_random_visits_all_candidates() {
        let mut strategy = Strategy::random();
        let candidates = instances(&["a", "b", "c"]);

        let mut seen = HashSet::new();
        for _ in 0..300 {
            let picked = strategy.pick("math", &candidates).unwrap();
            // Never selects outside the candidate set
            assert!(candidates.iter().any(|c| c.node_id == picked.node_id));
            seen.insert(picked.node_id.clone());
        }
        assert_eq!(seen.len(), 3, "every candidate should be visited");
    }

    #[test]
    fn test_empty_candidates_yield_none() {
        let mut strategy = Strategy::round_robin();
        assert!(strategy.pick("math", &[]).is_none());
        let mut strategy = Strategy::random();
        assert!(strategy.pick("math", &[]).is_none());
    }

    #[test]
    fn test_names() {
        assert_eq!(Strategy::round_robin().name(), "RoundRobin");
        assert_eq!(Strategy::random().name(), "Random");
    }
}
