pub mod round_robin;
pub mod random;
pub mod weight_round_robin;
pub mod consistent_hash;

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;
use serde::Deserialize;
use thiserror::Error;

pub use round_robin::RoundRobinBalance;
pub use random::RandomBalance;
pub use weight_round_robin::WeightRoundRobinBalance;
pub use consistent_hash::ConsistentHashBalance;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("weight parse error: {0}")]
    ParseError(#[from] ParseIntError),
    #[error("no backend available")]
    NoBackendAvailable,
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("unknown load balance type: {0}")]
    UnknownType(String),
}

/// 健康检查上报的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthEvent {
    /// 一次通讯失败，有效权重 -1
    Failure,
    /// 节点不可达，有效权重直接归零
    Down,
}

impl fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthEvent::Failure => f.write_str("failure"),
            HealthEvent::Down => f.write_str("down"),
        }
    }
}

/// 负载均衡策略
///
/// 每个实现自己持有节点列表和选择游标；`add` 与 `next` 之间的互斥由实现保证。
pub trait LoadBalance: Send + Sync + fmt::Debug {
    /// 注册一个节点，参数形状由具体策略决定
    fn add(&self, params: &[&str]) -> Result<(), BalanceError>;

    /// 选出下一个节点，没有节点时返回 None
    fn next(&self) -> Option<String>;

    /// 按 key 选择节点；不关心 key 的策略直接转发 `next`
    fn get(&self, _key: &str) -> Result<String, BalanceError> {
        self.next().ok_or(BalanceError::NoBackendAvailable)
    }

    /// 健康检查回调
    fn update(&self, addr: &str, event: HealthEvent) -> Result<(), BalanceError>;

    /// 当前节点列表（按注册顺序）
    fn backends(&self) -> Vec<String>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceType {
    Random,
    RoundRobin,
    WeightRoundRobin,
    ConsistentHash,
}

impl LoadBalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceType::Random => "random",
            LoadBalanceType::RoundRobin => "round-robin",
            LoadBalanceType::WeightRoundRobin => "weighted-round-robin",
            LoadBalanceType::ConsistentHash => "consistent-hash",
        }
    }
}

impl FromStr for LoadBalanceType {
    type Err = BalanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(LoadBalanceType::Random),
            "round-robin" => Ok(LoadBalanceType::RoundRobin),
            "weighted-round-robin" => Ok(LoadBalanceType::WeightRoundRobin),
            "consistent-hash" => Ok(LoadBalanceType::ConsistentHash),
            other => Err(BalanceError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for LoadBalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按类型构造一个空的负载均衡器
pub fn load_balance_factory(kind: LoadBalanceType) -> Arc<dyn LoadBalance> {
    match kind {
        LoadBalanceType::Random => Arc::new(RandomBalance::new()),
        LoadBalanceType::RoundRobin => Arc::new(RoundRobinBalance::new()),
        LoadBalanceType::WeightRoundRobin => Arc::new(WeightRoundRobinBalance::new()),
        LoadBalanceType::ConsistentHash => Arc::new(ConsistentHashBalance::new()),
    }
}

/// 不带权重的策略共用：至少一个参数，取第一个作为地址
pub(crate) fn first_addr<'a>(params: &[&'a str]) -> Result<&'a str, BalanceError> {
    match params.first() {
        Some(&addr) if !addr.is_empty() => Ok(addr),
        Some(_) => Err(BalanceError::InvalidArgument("empty address".to_string())),
        None => Err(BalanceError::InvalidArgument("params len 1 at least".to_string())),
    }
}
