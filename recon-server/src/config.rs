use crate::window::TradingWindow;
use anyhow::Context;
use chrono::NaiveTime;
use recon_engine::PipelineConfig;
use serde::Deserialize;
use std::time::Duration;

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_broker_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_max_broker_calls() -> usize {
    32
}

fn default_max_store_calls() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_open() -> String {
    "09:15".to_string()
}

fn default_close() -> String {
    "15:30".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_true")]
    pub always_open: bool,
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            always_open: true,
            open: default_open(),
            close: default_close(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds between reconciliation cycles per tenant.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Cap on concurrent outbound broker calls across all tenants.
    #[serde(default = "default_max_broker_calls")]
    pub max_broker_calls: usize,
    /// Cap on concurrent store operations across all tenants.
    #[serde(default = "default_max_store_calls")]
    pub max_store_calls: usize,
    #[serde(default)]
    pub window: WindowConfig,
}

impl ServerConfig {
    /// Layers an optional config file under `RECON_*` environment
    /// overrides, e.g. `RECON_TICK_SECONDS=5`.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("RECON").separator("__"));
        let raw = builder.build().context("building configuration")?;
        raw.try_deserialize().context("deserializing configuration")
    }

    pub fn trading_window(&self) -> anyhow::Result<TradingWindow> {
        if self.window.always_open {
            return Ok(TradingWindow::always_open());
        }
        let open = NaiveTime::parse_from_str(&self.window.open, "%H:%M")
            .with_context(|| format!("invalid window.open '{}'", self.window.open))?;
        let close = NaiveTime::parse_from_str(&self.window.close, "%H:%M")
            .with_context(|| format!("invalid window.close '{}'", self.window.close))?;
        Ok(TradingWindow::between(open, close))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            broker_timeout: Duration::from_millis(self.broker_timeout_ms),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tick_seconds: default_tick_seconds(),
            broker_timeout_ms: default_broker_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            max_broker_calls: default_max_broker_calls(),
            max_store_calls: default_max_store_calls(),
            window: WindowConfig::default(),
        }
    }
}
