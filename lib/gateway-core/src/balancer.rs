//! Endpoint selection policies for pooled clients

use crate::Endpoint;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selection policy among the currently live endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Uniformly random endpoint per call
    #[default]
    Random,
    /// Cycle through endpoints in order
    RoundRobin,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(SelectionPolicy::Random),
            "round-robin" | "round_robin" | "roundrobin" => Ok(SelectionPolicy::RoundRobin),
            other => Err(format!("unknown selection policy: {}", other)),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Random => f.write_str("random"),
            SelectionPolicy::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// Load balancer for selecting endpoints based on a policy
#[derive(Debug)]
pub struct LoadBalancer {
    policy: SelectionPolicy,
    round_robin_counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Select a ready endpoint, or `None` when nothing is live
    pub fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let ready_endpoints: Vec<&'a Endpoint> = endpoints.iter().filter(|e| e.ready).collect();

        if ready_endpoints.is_empty() {
            return None;
        }

        match self.policy {
            SelectionPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..ready_endpoints.len());
                ready_endpoints.get(index).copied()
            }
            SelectionPolicy::RoundRobin => {
                let current = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
                ready_endpoints.get(current % ready_endpoints.len()).copied()
            }
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(SelectionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("10.0.0.1", 80),
            Endpoint {
                ip: "10.0.0.2".to_string(),
                port: 80,
                ready: false,
            },
            Endpoint::new("10.0.0.3", 80),
        ]
    }

    #[test]
    fn test_empty_and_unready() {
        let balancer = LoadBalancer::default();
        assert!(balancer.select(&[]).is_none());

        let unready = vec![Endpoint {
            ip: "10.0.0.9".to_string(),
            port: 80,
            ready: false,
        }];
        assert!(balancer.select(&unready).is_none());
    }

    #[test]
    fn test_random_only_picks_ready() {
        let balancer = LoadBalancer::new(SelectionPolicy::Random);
        let endpoints = endpoints();
        for _ in 0..50 {
            let selected = balancer.select(&endpoints).unwrap();
            assert!(selected.ready);
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let balancer = LoadBalancer::new(SelectionPolicy::RoundRobin);
        let endpoints = endpoints();
        let picks: Vec<&str> = (0..4)
            .map(|_| balancer.select(&endpoints).unwrap().ip.as_str())
            .collect();
        assert_eq!(picks, vec!["10.0.0.1", "10.0.0.3", "10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("random".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Random));
        assert_eq!("Round-Robin".parse::<SelectionPolicy>(), Ok(SelectionPolicy::RoundRobin));
        assert!("least-conn".parse::<SelectionPolicy>().is_err());
        assert_eq!(SelectionPolicy::default(), SelectionPolicy::Random);
    }
}
