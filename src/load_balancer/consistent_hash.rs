use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use arc_swap::ArcSwap;
use rand::Rng;
use crate::load_balancer::{first_addr, BalanceError, HealthEvent, LoadBalance};

const DEFAULT_REPLICAS: usize = 150;

/// 哈希环状态（不可变对象，变更时整体替换）
#[derive(Debug, Default)]
struct RingState {
    ring: BTreeMap<u64, String>,
    upstreams: Vec<String>,
}

impl RingState {
    fn build(upstreams: Vec<String>, replicas: usize) -> Self {
        let mut ring = BTreeMap::new();

        for upstream in &upstreams {
            for i in 0..replicas {
                let key = format!("{}#{}", upstream, i);
                ring.insert(hash(&key), upstream.clone());
            }
        }

        Self { ring, upstreams }
    }

    fn find(&self, point: u64) -> Option<String> {
        if let Some((_, upstream)) = self.ring.range(point..).next() {
            return Some(upstream.clone());
        }

        // 环回到第一个节点
        self.ring.values().next().cloned()
    }
}

fn hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// 一致性哈希负载均衡
///
/// 同一个 key 总是落到同一个节点上；增加节点只迁移环上相邻的一小段 key。
#[derive(Debug)]
pub struct ConsistentHashBalance {
    state: ArcSwap<RingState>,
    replicas: usize,
}

impl ConsistentHashBalance {
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    /// 每个节点在环上的虚拟节点数
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            state: ArcSwap::from_pointee(RingState::default()),
            replicas: replicas.max(1),
        }
    }
}

impl Default for ConsistentHashBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for ConsistentHashBalance {
    fn add(&self, params: &[&str]) -> Result<(), BalanceError> {
        let addr = first_addr(params)?;
        self.state.rcu(|state| {
            let mut upstreams = state.upstreams.clone();
            upstreams.push(addr.to_string());
            Arc::new(RingState::build(upstreams, self.replicas))
        });
        Ok(())
    }

    /// 没有 key 时在环上随机取一个点
    fn next(&self) -> Option<String> {
        let point = rand::thread_rng().gen_range(0..=u64::MAX);
        self.state.load().find(point)
    }

    fn get(&self, key: &str) -> Result<String, BalanceError> {
        if key.is_empty() {
            return Err(BalanceError::InvalidArgument("hash key is empty".to_string()));
        }
        self.state
            .load()
            .find(hash(key))
            .ok_or(BalanceError::NoBackendAvailable)
    }

    fn update(&self, addr: &str, event: HealthEvent) -> Result<(), BalanceError> {
        if !self.state.load().upstreams.iter().any(|u| u == addr) {
            return Err(BalanceError::UnknownBackend(addr.to_string()));
        }
        tracing::debug!(addr, %event, "consistent-hash ignores health events");
        Ok(())
    }

    fn backends(&self) -> Vec<String> {
        self.state.load().upstreams.clone()
    }

    fn name(&self) -> &'static str {
        "consistent-hash"
    }
}
