use serde::Deserialize;

fn default_upstreams_file() -> String {
    "upstreams".to_string()
}

fn default_strategy() -> String {
    "weighted-round-robin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub gateway_bind: String,
    /// upstream 配置文件名（不带扩展名），固定 TOML 格式
    #[serde(default = "default_upstreams_file")]
    pub upstreams_file: String,
    /// upstream 未指定 strategy 时使用
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

pub fn load_settings() -> Result<Settings, config::ConfigError> {
    // also load .env
    dotenvy::dotenv().ok();
    let c = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::default())
        .build()?;
    c.try_deserialize::<Settings>()
}

fn default_weight() -> i64 {
    1
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub name: String,
    pub strategy: Option<String>,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Deserialize)]
struct UpstreamsFile {
    #[serde(default)]
    upstreams: Vec<UpstreamConfig>,
}

/// 读取 upstream 配置，文件名如 upstreams.toml
pub fn load_upstreams(name: &str) -> Result<Vec<UpstreamConfig>, config::ConfigError> {
    let c = config::Config::builder()
        .add_source(config::File::new(name, config::FileFormat::Toml))
        .build()?;
    let uf: UpstreamsFile = c.try_deserialize()?;
    Ok(uf.upstreams)
}

pub fn parse_upstreams(toml: &str) -> Result<Vec<UpstreamConfig>, config::ConfigError> {
    let c = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;
    let uf: UpstreamsFile = c.try_deserialize()?;
    Ok(uf.upstreams)
}
