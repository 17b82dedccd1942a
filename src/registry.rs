//! 按服务名管理负载均衡器。
//!
//! 配置加载时为每个 upstream 构造一个策略实例并逐个注册节点；
//! 重新加载时整体替换，旧实例直接丢弃，不做原地修改。

use std::collections::HashMap;
use std::sync::Arc;
use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use crate::config::UpstreamConfig;
use crate::load_balancer::{load_balance_factory, BalanceError, HealthEvent, LoadBalance, LoadBalanceType};
use crate::metrics;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown upstream service: {0}")]
    UnknownService(String),
    #[error("upstream {service}: unknown strategy {strategy}")]
    UnknownStrategy { service: String, strategy: String },
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

type Services = HashMap<String, Arc<dyn LoadBalance>>;

#[derive(Debug)]
pub struct UpstreamRegistry {
    services: ArcSwap<Services>,
    default_strategy: LoadBalanceType,
}

impl UpstreamRegistry {
    pub fn new(default_strategy: LoadBalanceType) -> Self {
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
            default_strategy,
        }
    }

    pub fn from_configs(
        configs: &[UpstreamConfig],
        default_strategy: LoadBalanceType,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new(default_strategy);
        registry.reload(configs)?;
        Ok(registry)
    }

    /// 用新配置重建全部策略实例；任何一个 upstream 的策略名非法时保留旧配置
    pub fn reload(&self, configs: &[UpstreamConfig]) -> Result<(), RegistryError> {
        let mut services: Services = HashMap::with_capacity(configs.len());
        for cfg in configs {
            let lb = self.build(cfg)?;
            if services.insert(cfg.name.clone(), lb).is_some() {
                warn!(service = %cfg.name, "duplicate upstream name, later definition wins");
            }
        }

        info!(services = services.len(), "upstream registry loaded");
        self.services.store(Arc::new(services));
        Ok(())
    }

    fn build(&self, cfg: &UpstreamConfig) -> Result<Arc<dyn LoadBalance>, RegistryError> {
        let kind = match cfg.strategy.as_deref() {
            Some(name) => name.parse().map_err(|_| RegistryError::UnknownStrategy {
                service: cfg.name.clone(),
                strategy: name.to_string(),
            })?,
            None => self.default_strategy,
        };

        let lb = load_balance_factory(kind);
        for backend in &cfg.backends {
            let weight = backend.weight.to_string();
            match lb.add(&[backend.addr.as_str(), weight.as_str()]) {
                Ok(()) => debug!(
                    service = %cfg.name,
                    addr = %backend.addr,
                    weight = backend.weight,
                    "backend registered"
                ),
                Err(err) => {
                    // 只放弃这个节点，同一 upstream 的其他节点照常注册
                    error!(service = %cfg.name, addr = %backend.addr, %err, "backend rejected");
                    metrics::REJECTED_BACKENDS.with_label_values(&[&cfg.name]).inc();
                }
            }
        }

        info!(
            service = %cfg.name,
            strategy = lb.name(),
            backends = lb.backends().len(),
            "upstream configured"
        );
        Ok(lb)
    }

    pub fn balancer(&self, service: &str) -> Result<Arc<dyn LoadBalance>, RegistryError> {
        self.services
            .load()
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(service.to_string()))
    }

    /// 为请求选择一个节点
    pub fn next(&self, service: &str) -> Result<String, RegistryError> {
        let lb = self.balancer(service)?;
        let picked = lb.next().ok_or(BalanceError::NoBackendAvailable);
        Self::record(service, lb.as_ref(), picked)
    }

    pub fn get(&self, service: &str, key: &str) -> Result<String, RegistryError> {
        let lb = self.balancer(service)?;
        let picked = lb.get(key);
        Self::record(service, lb.as_ref(), picked)
    }

    fn record(
        service: &str,
        lb: &dyn LoadBalance,
        picked: Result<String, BalanceError>,
    ) -> Result<String, RegistryError> {
        match &picked {
            Ok(addr) => {
                debug!(service, strategy = lb.name(), addr = %addr, "backend selected");
                metrics::SELECTIONS.with_label_values(&[service, lb.name(), addr.as_str()]).inc();
            }
            Err(BalanceError::NoBackendAvailable) => {
                warn!(service, "no backend available");
                metrics::EMPTY_SELECTIONS.with_label_values(&[service]).inc();
            }
            Err(_) => {}
        }
        picked.map_err(RegistryError::from)
    }

    /// 健康检查上报入口
    pub fn report(&self, service: &str, addr: &str, event: HealthEvent) -> Result<(), RegistryError> {
        let lb = self.balancer(service)?;
        lb.update(addr, event)?;
        metrics::HEALTH_EVENTS
            .with_label_values(&[service, event.to_string().as_str()])
            .inc();
        Ok(())
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn backends(&self, service: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self.balancer(service)?.backends())
    }
}
