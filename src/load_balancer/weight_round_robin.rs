use std::sync::{Mutex, MutexGuard, PoisonError};
use crate::load_balancer::{BalanceError, HealthEvent, LoadBalance};

/// 单个 upstream 所有节点权重之和的上限。
/// 临时权重的绝对值不超过节点数 × 权重和，保持在这个范围内 next 中的加减不会溢出。
pub const MAX_TOTAL_WEIGHT: i64 = u32::MAX as i64;

/// 单个带权重的上游节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightNode {
    pub addr: String,
    /// 初始化时对节点约定的权重
    pub weight: i64,
    /// 临时权重，每轮都会变化
    current_weight: i64,
    /// 有效权重，默认与 weight 相同，故障时下调，每轮选择 +1 直到恢复
    effective_weight: i64,
}

impl WeightNode {
    fn new(addr: String, weight: i64) -> Self {
        Self {
            addr,
            weight,
            current_weight: 0,
            effective_weight: weight,
        }
    }

    pub fn effective_weight(&self) -> i64 {
        self.effective_weight
    }

    pub fn current_weight(&self) -> i64 {
        self.current_weight
    }
}

/// 平滑加权轮询（与 Nginx / LVS 相同的算法）
///
/// 每次选择：
/// 1. `current_weight += effective_weight`
/// 2. 选出 `current_weight` 最大的节点（相等时先注册的优先）
/// 3. 被选中节点 `current_weight -= sum(effective_weight)`
///
/// 整个节点列表和所有节点的权重字段由同一把锁保护，锁只在一次调用内持有。
#[derive(Debug, Default)]
pub struct WeightRoundRobinBalance {
    nodes: Mutex<Vec<WeightNode>>,
}

impl WeightRoundRobinBalance {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WeightNode>> {
        // add 限制了权重和，临界区内的算术不会溢出
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 节点状态快照，用于观测和测试
    pub fn snapshot(&self) -> Vec<WeightNode> {
        self.lock().clone()
    }

    /// 第一个匹配地址的有效权重
    pub fn effective_weight(&self, addr: &str) -> Option<i64> {
        self.lock()
            .iter()
            .find(|n| n.addr == addr)
            .map(|n| n.effective_weight)
    }
}

impl LoadBalance for WeightRoundRobinBalance {
    fn add(&self, params: &[&str]) -> Result<(), BalanceError> {
        if params.len() != 2 {
            return Err(BalanceError::InvalidArgument("params len need 2".to_string()));
        }
        let addr = params[0];
        if addr.is_empty() {
            return Err(BalanceError::InvalidArgument("empty address".to_string()));
        }
        let weight: i64 = params[1].parse()?;
        if weight < 1 {
            return Err(BalanceError::InvalidArgument(format!(
                "weight must be at least 1, got {}",
                weight
            )));
        }

        let mut nodes = self.lock();
        let total = nodes
            .iter()
            .map(|n| n.weight)
            .sum::<i64>()
            .checked_add(weight)
            .filter(|total| *total <= MAX_TOTAL_WEIGHT);
        if total.is_none() {
            return Err(BalanceError::InvalidArgument(format!(
                "total weight would exceed {}",
                MAX_TOTAL_WEIGHT
            )));
        }

        nodes.push(WeightNode::new(addr.to_string(), weight));
        Ok(())
    }

    fn next(&self) -> Option<String> {
        let mut nodes = self.lock();
        let mut best: Option<usize> = None;
        let mut total = 0;

        for i in 0..nodes.len() {
            let node = &mut nodes[i];
            total += node.effective_weight;
            node.current_weight += node.effective_weight;
            // 故障后逐轮恢复，不超过约定权重
            if node.effective_weight < node.weight {
                node.effective_weight += 1;
            }

            let current = node.current_weight;
            match best {
                Some(b) if current <= nodes[b].current_weight => {}
                _ => best = Some(i),
            }
        }

        let best = &mut nodes[best?];
        best.current_weight -= total;
        Some(best.addr.clone())
    }

    fn update(&self, addr: &str, event: HealthEvent) -> Result<(), BalanceError> {
        let mut nodes = self.lock();
        let mut found = false;

        for node in nodes.iter_mut().filter(|n| n.addr == addr) {
            found = true;
            node.effective_weight = match event {
                HealthEvent::Failure => (node.effective_weight - 1).max(0),
                HealthEvent::Down => 0,
            };
            tracing::warn!(
                addr,
                %event,
                effective_weight = node.effective_weight,
                weight = node.weight,
                "backend weight penalized"
            );
        }

        if found {
            Ok(())
        } else {
            Err(BalanceError::UnknownBackend(addr.to_string()))
        }
    }

    fn backends(&self) -> Vec<String> {
        self.lock().iter().map(|n| n.addr.clone()).collect()
    }

    fn name(&self) -> &'static str {
        "weighted-round-robin"
    }
}
