use super::GroupMap;
use crate::core::ServerDescriptor;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// One connection attempt slot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub group: u32,
    pub server: Arc<ServerDescriptor>,
}

/// Ordered attempt list for one route.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    pub candidates: Vec<Candidate>,
    /// Number of candidates produced by the first pass over the groups.
    pub unique_servers: usize,
    /// Lowest priority group number present.
    pub best_group: u32,
}

impl CandidatePlan {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Builds the attempt order: groups ascending, servers shuffled within a
/// group, whole traversals repeated (and reshuffled) until at least
/// `min_attempts` candidates exist.
///
/// Returns `None` when the groups hold no servers at all.
pub fn build_candidates<R: Rng + ?Sized>(
    groups: &GroupMap,
    min_attempts: usize,
    rng: &mut R,
) -> Option<CandidatePlan> {
    let best_group = *groups
        .iter()
        .find(|(_, servers)| !servers.is_empty())?
        .0;

    let mut candidates = Vec::new();
    let mut unique_servers = None;

    loop {
        for (group, servers) in groups {
            let mut order: Vec<&Arc<ServerDescriptor>> = servers.iter().collect();
            order.shuffle(rng);
            candidates.extend(order.into_iter().map(|server| Candidate {
                group: *group,
                server: Arc::clone(server),
            }));
        }

        if unique_servers.is_none() {
            unique_servers = Some(candidates.len());
        }
        if candidates.len() >= min_attempts {
            break;
        }
    }

    Some(CandidatePlan {
        candidates,
        unique_servers: unique_servers.unwrap_or(0),
        best_group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeMap;

    fn groups(layout: &[(u32, &[&str])]) -> GroupMap {
        let mut map = BTreeMap::new();
        for (group, hosts) in layout {
            let servers = hosts
                .iter()
                .map(|host| Arc::new(ServerDescriptor::new(host, "u", "p", "db")))
                .collect::<Vec<_>>();
            map.insert(*group, servers);
        }
        map
    }

    fn hosts(plan: &CandidatePlan) -> Vec<String> {
        plan.candidates.iter().map(|c| c.server.host.clone()).collect()
    }

    #[test]
    fn test_groups_in_priority_order() {
        let map = groups(&[(2, &["C"]), (1, &["A", "B"])]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let plan = build_candidates(&map, 3, &mut rng).unwrap();
            let order = hosts(&plan);
            assert_eq!(plan.unique_servers, 3);
            assert_eq!(plan.best_group, 1);
            assert_eq!(order.len(), 3);
            assert_eq!(order[2], "C");
            assert!(order[..2].contains(&"A".to_string()));
            assert!(order[..2].contains(&"B".to_string()));
        }
    }

    #[test]
    fn test_repeats_until_min_attempts() {
        let map = groups(&[(1, &["A", "B"]), (2, &["C"])]);
        let mut rng = StdRng::seed_from_u64(11);

        let plan = build_candidates(&map, 5, &mut rng).unwrap();
        let order = hosts(&plan);
        assert_eq!(plan.unique_servers, 3);
        assert_eq!(order.len(), 6);
        assert_eq!(order[2], "C");
        assert_eq!(order[5], "C");
    }

    #[test]
    fn test_single_server_is_retried() {
        let map = groups(&[(1, &["A"])]);
        let plan = build_candidates(&map, 3, &mut rand::thread_rng()).unwrap();
        assert_eq!(hosts(&plan), vec!["A", "A", "A"]);
        assert_eq!(plan.unique_servers, 1);
    }

    #[test]
    fn test_shuffles_within_group() {
        let map = groups(&[(1, &["A", "B", "C", "D"])]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut firsts = std::collections::HashSet::new();
        for _ in 0..100 {
            let plan = build_candidates(&map, 1, &mut rng).unwrap();
            firsts.insert(plan.candidates[0].server.host.clone());
        }
        assert!(firsts.len() > 1);
    }

    #[test]
    fn test_empty_groups() {
        let map = groups(&[(1, &[])]);
        assert!(build_candidates(&map, 3, &mut rand::thread_rng()).is_none());
        assert!(build_candidates(&GroupMap::new(), 3, &mut rand::thread_rng()).is_none());
    }
}
