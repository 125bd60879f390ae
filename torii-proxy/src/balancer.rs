use crate::target::Target;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use torii_core::config::Algorithm;

/// A selection strategy over the live target list.
///
/// Strategies only see the healthy subset; when it is empty they
/// return `None`. Selection must be safe under concurrent callers.
trait BalancerStrategy: Send + Sync {
    fn select(&self, healthy: &[Arc<Target>], client_ip: Option<&str>) -> Option<Arc<Target>>;
}

/// Strategy-local index advanced atomically per call.
struct RoundRobin {
    index: AtomicUsize,
}

impl BalancerStrategy for RoundRobin {
    fn select(&self, healthy: &[Arc<Target>], _client_ip: Option<&str>) -> Option<Arc<Target>> {
        let index = self.index.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(Arc::clone(&healthy[index]))
    }
}

/// Smooth weighted round-robin: each call adds every target's
/// effective weight to its running weight, picks the maximum, then
/// subtracts the total from the winner. Interleaves selections so
/// heavy targets never clump.
struct SmoothWeightedRoundRobin {
    current: Mutex<HashMap<String, i64>>,
}

impl BalancerStrategy for SmoothWeightedRoundRobin {
    fn select(&self, healthy: &[Arc<Target>], _client_ip: Option<&str>) -> Option<Arc<Target>> {
        let total: i64 = healthy.iter().map(|t| t.effective_weight() as i64).sum();
        if total == 0 {
            return healthy.first().map(Arc::clone);
        }

        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for target in healthy {
            *current.entry(target.address()).or_insert(0) += target.effective_weight() as i64;
        }

        let mut best: Option<&Arc<Target>> = None;
        let mut best_weight = i64::MIN;
        for target in healthy {
            let weight = current.get(&target.address()).copied().unwrap_or(0);
            if weight > best_weight {
                best_weight = weight;
                best = Some(target);
            }
        }

        let best = best?;
        *current.entry(best.address()).or_insert(0) -= total;
        Some(Arc::clone(best))
    }
}

/// Minimum in-flight connections wins; ties keep list order.
struct LeastConnections;

impl BalancerStrategy for LeastConnections {
    fn select(&self, healthy: &[Arc<Target>], _client_ip: Option<&str>) -> Option<Arc<Target>> {
        healthy
            .iter()
            .min_by_key(|t| t.active_connections())
            .map(Arc::clone)
    }
}

/// Stable hash of the client IP over the healthy set: the same client
/// keeps hitting the same target as long as the set is unchanged.
struct IpHash;

impl BalancerStrategy for IpHash {
    fn select(&self, healthy: &[Arc<Target>], client_ip: Option<&str>) -> Option<Arc<Target>> {
        let ip = client_ip.unwrap_or("127.0.0.1");
        let digest = Sha256::digest(ip.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(prefix) % healthy.len() as u64) as usize;
        Some(Arc::clone(&healthy[index]))
    }
}

/// Weighted random by effective weight; uniform when all weights zero.
struct WeightedRandom;

impl BalancerStrategy for WeightedRandom {
    fn select(&self, healthy: &[Arc<Target>], _client_ip: Option<&str>) -> Option<Arc<Target>> {
        let total: u64 = healthy.iter().map(|t| t.effective_weight() as u64).sum();
        let mut rng = rand::thread_rng();

        if total == 0 {
            let index = rng.gen_range(0..healthy.len());
            return Some(Arc::clone(&healthy[index]));
        }

        let mut remaining = rng.gen_range(0..total);
        for target in healthy {
            let weight = target.effective_weight() as u64;
            if remaining < weight {
                return Some(Arc::clone(target));
            }
            remaining -= weight;
        }
        healthy.last().map(Arc::clone)
    }
}

/// Balancer bound to one upstream: algorithm name plus strategy state.
pub struct LoadBalancer {
    algorithm: Algorithm,
    strategy: Box<dyn BalancerStrategy>,
}

impl LoadBalancer {
    pub fn new(algorithm: Algorithm) -> Self {
        let strategy: Box<dyn BalancerStrategy> = match algorithm {
            Algorithm::RoundRobin => Box::new(RoundRobin {
                index: AtomicUsize::new(0),
            }),
            Algorithm::Weighted => Box::new(SmoothWeightedRoundRobin {
                current: Mutex::new(HashMap::new()),
            }),
            Algorithm::LeastConnections => Box::new(LeastConnections),
            Algorithm::IpHash => Box::new(IpHash),
            Algorithm::Random => Box::new(WeightedRandom),
        };
        Self {
            algorithm,
            strategy,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Pick a target from the healthy subset of `targets`.
    pub fn select(&self, targets: &[Arc<Target>], client_ip: Option<&str>) -> Option<Arc<Target>> {
        let healthy: Vec<Arc<Target>> = targets
            .iter()
            .filter(|t| t.is_healthy())
            .map(Arc::clone)
            .collect();
        if healthy.is_empty() {
            return None;
        }
        self.strategy.select(&healthy, client_ip)
    }
}
