pub mod api;
pub mod config;
pub mod load_balancer;
pub mod metrics;
pub mod registry;

pub use load_balancer::{load_balance_factory, BalanceError, HealthEvent, LoadBalance, LoadBalanceType};
pub use registry::{RegistryError, UpstreamRegistry};
