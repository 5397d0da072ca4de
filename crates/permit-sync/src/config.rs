use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

use crate::channel::{ChannelKind, ChannelSet, SpoolChannel, TransportChannel};
use crate::command::CommandChannel;
use crate::logging::LogLevel;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_PATH: &str = "/api/permits";
const DEFAULT_DATABASE: &str = "permit-fallback.db";
const DEFAULT_SPOOL_DIR: &str = "spool";

#[derive(Parser, Debug, Default)]
#[command(name = "permit-sync")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub config: String,
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub path: String,
    #[arg(long, default_value = "")]
    pub log_level: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value = "")]
    pub database: String,
    /// Deadline in seconds for a whole `process` call; 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub process_timeout: u64,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    InvalidLogLevel(String),
    #[error("endpoint path must start with '/': {0}")]
    InvalidPath(String),
    #[error("invalid process timeout (expected whole seconds): {0}")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub logging: LoggingSection,
    pub fallback: FallbackSection,
    pub channels: ChannelsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: Option<String>,
    pub path: Option<String>,
    pub process_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsSection {
    pub ingestion: Option<ChannelConfig>,
    pub events: Option<ChannelConfig>,
    pub analytics: Option<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Spool {
        path: String,
    },
}

impl ChannelConfig {
    fn default_for(kind: ChannelKind) -> Self {
        ChannelConfig::Spool {
            path: format!("{DEFAULT_SPOOL_DIR}/{kind}.jsonl"),
        }
    }

    pub fn build(&self, kind: ChannelKind) -> Arc<dyn TransportChannel> {
        match self {
            ChannelConfig::Command { program, args } => {
                Arc::new(CommandChannel::new(kind, program.clone(), args.clone()))
            }
            ChannelConfig::Spool { path } => Arc::new(SpoolChannel::new(path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr: String,
    pub path: String,
    pub log_level: LogLevel,
    pub log_dir: String,
    pub database: String,
    pub process_timeout: Option<Duration>,
    pub channels: BTreeMap<ChannelKind, ChannelConfig>,
}

impl Config {
    /// Merge flags, environment and file. Flags win over the environment,
    /// which wins over the file.
    pub fn resolve<E>(args: &Args, file: FileConfig, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        let pick = |flag: &str, key: &str, from_file: Option<String>, default: &str| {
            if !flag.trim().is_empty() {
                return flag.to_string();
            }
            lookup(key)
                .or(from_file)
                .unwrap_or_else(|| default.to_string())
        };

        let debug =
            args.debug || lookup("PERMIT_SYNC_DEBUG").is_some_and(|value| is_truthy(&value));
        let log_level = if debug {
            LogLevel::Debug
        } else {
            pick(&args.log_level, "PERMIT_SYNC_LOG_LEVEL", file.logging.level, "info")
                .parse::<LogLevel>()
                .map_err(ConfigError::InvalidLogLevel)?
        };

        let path = pick(&args.path, "PERMIT_SYNC_PATH", file.server.path, DEFAULT_PATH);
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath(path));
        }

        let timeout_secs = if args.process_timeout > 0 {
            args.process_timeout
        } else {
            match lookup("PERMIT_SYNC_PROCESS_TIMEOUT") {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidTimeout(value.clone()))?,
                None => file.server.process_timeout_secs.unwrap_or(0),
            }
        };

        let mut channels = BTreeMap::new();
        for (kind, configured) in [
            (ChannelKind::Ingestion, file.channels.ingestion),
            (ChannelKind::Events, file.channels.events),
            (ChannelKind::Analytics, file.channels.analytics),
        ] {
            channels.insert(
                kind,
                configured.unwrap_or_else(|| ChannelConfig::default_for(kind)),
            );
        }

        Ok(Self {
            addr: pick(&args.addr, "PERMIT_SYNC_ADDR", file.server.addr, DEFAULT_ADDR),
            path,
            log_level,
            log_dir: pick(&args.log_dir, "PERMIT_SYNC_LOG_DIR", file.logging.log_dir, ""),
            database: pick(
                &args.database,
                "PERMIT_SYNC_DATABASE",
                file.fallback.database,
                DEFAULT_DATABASE,
            ),
            process_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            channels,
        })
    }

    pub fn channel_set(&self) -> ChannelSet {
        let build = |kind: ChannelKind| {
            self.channels
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| ChannelConfig::default_for(kind))
                .build(kind)
        };
        ChannelSet::new(
            build(ChannelKind::Ingestion),
            build(ChannelKind::Events),
            build(ChannelKind::Analytics),
        )
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    let args = Args::parse();
    let file = match config_path(&args) {
        Some(path) => read_config_file(&path)?,
        None => FileConfig::default(),
    };
    Config::resolve(&args, file, |key| std::env::var(key).ok())
}

pub fn read_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn config_path(args: &Args) -> Option<PathBuf> {
    if !args.config.trim().is_empty() {
        return Some(PathBuf::from(&args.config));
    }
    match std::env::var("PERMIT_SYNC_CONFIG") {
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
