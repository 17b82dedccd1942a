use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upstream_balancer::{api, config, LoadBalanceType, UpstreamRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志：若无 RUST_LOG 则默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();
    // 加载环境配置
    let settings = config::load_settings()?;
    let default_strategy: LoadBalanceType = settings.default_strategy.parse()?;

    // 加载 upstream 配置，为每个服务构造负载均衡器
    let upstreams = config::load_upstreams(&settings.upstreams_file)?;
    let registry = Arc::new(UpstreamRegistry::from_configs(&upstreams, default_strategy)?);

    let app = api::router(registry, settings.upstreams_file.clone());

    let listener = TcpListener::bind(&settings.gateway_bind).await?;
    tracing::info!("🚀 Upstream balancer listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
