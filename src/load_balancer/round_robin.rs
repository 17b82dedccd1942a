use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use arc_swap::ArcSwap;
use crate::load_balancer::{first_addr, BalanceError, HealthEvent, LoadBalance};

/// 轮询负载均衡
#[derive(Debug)]
pub struct RoundRobinBalance {
    upstreams: ArcSwap<Vec<String>>,
    current: AtomicUsize,
}

impl RoundRobinBalance {
    pub fn new() -> Self {
        Self {
            upstreams: ArcSwap::from_pointee(Vec::new()),
            current: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for RoundRobinBalance {
    fn add(&self, params: &[&str]) -> Result<(), BalanceError> {
        let addr = first_addr(params)?;
        // rcu 保证并发注册不会互相覆盖
        self.upstreams.rcu(|ups| {
            let mut list = Vec::clone(ups);
            list.push(addr.to_string());
            Arc::new(list)
        });
        Ok(())
    }

    /// 游标只在有节点时前进，空列表期间的调用不影响之后的轮转起点
    fn next(&self) -> Option<String> {
        let ups = self.upstreams.load();
        let len = ups.len();
        if len == 0 {
            return None;
        }

        let cursor = self.current.fetch_add(1, Ordering::Relaxed);
        Some(ups[cursor % len].clone())
    }

    fn update(&self, addr: &str, event: HealthEvent) -> Result<(), BalanceError> {
        if !self.upstreams.load().iter().any(|u| u == addr) {
            return Err(BalanceError::UnknownBackend(addr.to_string()));
        }
        tracing::debug!(addr, %event, "round-robin ignores health events");
        Ok(())
    }

    fn backends(&self) -> Vec<String> {
        Vec::clone(&self.upstreams.load())
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
