use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use rand::Rng;
use arc_swap::ArcSwap;
use crate::load_balancer::{first_addr, BalanceError, HealthEvent, LoadBalance};

/// 随机负载均衡，每个节点被选中的概率相同
#[derive(Debug)]
pub struct RandomBalance {
    upstreams: ArcSwap<Vec<String>>,
    /// 最近一次选中的下标，只做观测用
    cur_index: AtomicUsize,
}

impl RandomBalance {
    pub fn new() -> Self {
        Self {
            upstreams: ArcSwap::from_pointee(Vec::new()),
            cur_index: AtomicUsize::new(0),
        }
    }

    pub fn last_index(&self) -> usize {
        self.cur_index.load(Ordering::Relaxed)
    }
}

impl Default for RandomBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for RandomBalance {
    fn add(&self, params: &[&str]) -> Result<(), BalanceError> {
        let addr = first_addr(params)?;
        self.upstreams.rcu(|ups| {
            let mut list = Vec::clone(ups);
            list.push(addr.to_string());
            Arc::new(list)
        });
        Ok(())
    }

    fn next(&self) -> Option<String> {
        let ups = self.upstreams.load();
        if ups.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..ups.len());
        self.cur_index.store(index, Ordering::Relaxed);
        ups.get(index).cloned()
    }

    fn update(&self, addr: &str, event: HealthEvent) -> Result<(), BalanceError> {
        if !self.upstreams.load().iter().any(|u| u == addr) {
            return Err(BalanceError::UnknownBackend(addr.to_string()));
        }
        tracing::debug!(addr, %event, "random ignores health events");
        Ok(())
    }

    fn backends(&self) -> Vec<String> {
        Vec::clone(&self.upstreams.load())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_uniform_distribution() {
        let lb = RandomBalance::new();
        lb.add(&["http://localhost:30000"]).unwrap();
        lb.add(&["http://localhost:30001"]).unwrap();
        lb.add(&["http://localhost:30002"]).unwrap();

        let mut counts = HashMap::new();
        for _ in 0..30000 {
            let url = lb.next().unwrap();
            *counts.entry(url).or_insert(0) += 1;
        }

        // 每个节点期望 10000 次，允许 10% 偏差
        assert_eq!(counts.len(), 3);
        for (url, count) in &counts {
            assert!((9000..=11000).contains(count), "{} selected {} times", url, count);
        }
    }

    #[test]
    fn test_last_index_tracks_selection() {
        let lb = RandomBalance::new();
        lb.add(&["http://localhost:30000"]).unwrap();
        lb.add(&["http://localhost:30001"]).unwrap();

        for _ in 0..20 {
            let url = lb.next().unwrap();
            assert_eq!(lb.backends()[lb.last_index()], url);
        }
    }

    #[test]
    fn test_add_validation() {
        let lb = RandomBalance::new();
        assert!(matches!(lb.add(&[]), Err(BalanceError::InvalidArgument(_))));
        // 多余参数（例如权重）被忽略
        lb.add(&["http://localhost:30000", "10"]).unwrap();
        assert_eq!(lb.backends(), vec!["http://localhost:30000".to_string()]);
    }

    #[test]
    fn test_duplicates_are_independent_entries() {
        let lb = RandomBalance::new();
        lb.add(&["http://localhost:30000"]).unwrap();
        lb.add(&["http://localhost:30000"]).unwrap();
        lb.add(&["http://localhost:30001"]).unwrap();
        assert_eq!(lb.backends().len(), 3);

        let mut hits = 0;
        for _ in 0..3000 {
            if lb.next().unwrap() == "http://localhost:30000" {
                hits += 1;
            }
        }
        // 重复注册的地址拿到约 2/3 的流量
        assert!(hits > 1700 && hits < 2300, "duplicate address hit {} times", hits);
    }

    #[test]
    fn test_empty_returns_none() {
        let lb = RandomBalance::new();
        for _ in 0..10 {
            assert_eq!(lb.next(), None);
            assert_eq!(lb.get(""), Err(BalanceError::NoBackendAvailable));
        }
    }
}
