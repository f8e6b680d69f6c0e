use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tagstream_engine::StreamConfig;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "tagstream", about = "Tag-routed publish/subscribe over an ordered log")]
pub struct Cli {
    /// Path to the TOML config file; built-in defaults when omitted
    #[arg(long, global = true, env = "CONFIG_PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish randomly tagged messages to simple consumers and count deliveries
    Demo(DemoArgs),
    /// Broadcast to several consumer groups and check each sees every message once
    BenchGroups(BenchArgs),
    /// Print messages for a consumer or group member until Ctrl+C
    Consume(ConsumeArgs),
    /// Dump the consumer stats table of a topic
    Stats(StatsArgs),
    /// Show the pending entries of a group
    Pending(PendingArgs),
    /// Move idle pending entries of a group to another member
    Claim(ClaimArgs),
}

#[derive(Args, Clone, Debug)]
pub struct DemoArgs {
    #[arg(long, default_value = "demo")]
    pub topic: String,
    #[arg(long, default_value_t = 10_000)]
    pub messages: usize,
    /// Consumer names; each also serves as the consumer's tag
    #[arg(long, value_delimiter = ',', default_value = "c1,c2")]
    pub consumers: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    #[arg(long, default_value = "bench")]
    pub topic: String,
    #[arg(long, default_value_t = 100_000)]
    pub messages: usize,
    #[arg(long, default_value_t = 5)]
    pub groups: usize,
    #[arg(long, default_value_t = 2)]
    pub members: usize,
}

#[derive(Args, Clone, Debug)]
pub struct ConsumeArgs {
    pub topic: String,
    /// Consumer name, or member name when `--group` is given
    pub name: String,
    #[arg(long)]
    pub group: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct StatsArgs {
    pub topic: String,
    /// Drop every row after printing; live entities write theirs again
    #[arg(long)]
    pub reset: bool,
}

#[derive(Args, Clone, Debug)]
pub struct PendingArgs {
    pub topic: String,
    pub group: String,
    #[arg(long, default_value_t = 20)]
    pub count: usize,
}

#[derive(Args, Clone, Debug)]
pub struct ClaimArgs {
    pub topic: String,
    pub group: String,
    pub sweeper: String,
    #[arg(long, default_value_t = 60_000)]
    pub min_idle_ms: u64,
}

// ---- TOML Config ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> Result<Self, CliError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| CliError::Config { context: "read", detail: format!("'{path}': {e}") })?;
                Self::parse(&content)
                    .map_err(|e| CliError::Config { context: "parse", detail: format!("'{path}': {e}") })?
            }
            None => Self::default(),
        };
        config
            .stream
            .validate()
            .map_err(|e| CliError::Config { context: "stream", detail: e.to_string() })?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
