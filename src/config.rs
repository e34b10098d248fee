//! Configuration module for framewire.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use crate::client::ClientOptions;
use crate::runtime::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::runtime::{Codec, HeaderEncoding, SessionOptions};

/// Which service the binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Echo every frame back to its sender
    #[default]
    Echo,
    /// Channel broker
    Broker,
    /// Reconnecting client
    Client,
}

/// Frame header layout on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HeaderType {
    /// 4-byte big-endian length
    #[default]
    Binary,
    /// 4 ASCII digits, zero-padded
    Decimal,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "framewire")]
#[command(version)]
#[command(about = "Length-prefixed TCP echo server, channel broker and reconnecting client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service to run
    #[arg(long, value_enum, default_value_t = Mode::Echo)]
    pub mode: Mode,

    /// Address to bind to (e.g., 127.0.0.1:3200)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Address to connect to in client mode
    #[arg(long)]
    pub connect: Option<String>,

    /// Frame header encoding
    #[arg(long, value_enum)]
    pub header: Option<HeaderType>,

    /// Close sessions idle for this many seconds (0 = never)
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

    /// Client keep-alive period in seconds (0 = disabled)
    #[arg(long)]
    pub keepalive: Option<u64>,

    /// Handshake id sent by the client
    #[arg(long)]
    pub id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            idle_timeout: 0,
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Address to connect to
    #[serde(default = "default_listen")]
    pub connect: String,
    /// Seconds between reconnect attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Keep-alive period in seconds (0 = disabled)
    #[serde(default)]
    pub keepalive_interval: u64,
    #[serde(default = "default_hello")]
    pub keepalive_payload: String,
    #[serde(default = "default_hello")]
    pub handshake_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_listen(),
            reconnect_interval: default_reconnect_interval(),
            keepalive_interval: 0,
            keepalive_payload: default_hello(),
            handshake_id: default_hello(),
        }
    }
}

/// Wire protocol configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub header: HeaderType,
    /// Largest accepted frame body in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            header: HeaderType::default(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:3200".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_reconnect_interval() -> u64 {
    3
}

fn default_hello() -> String {
    "hello".to_string()
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub listen: SocketAddr,
    pub connect: String,
    pub max_connections: usize,
    pub idle_timeout: u64,
    pub header: HeaderType,
    pub max_frame_size: usize,
    pub reconnect_interval: u64,
    pub keepalive_interval: u64,
    pub keepalive_payload: String,
    pub handshake_id: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid listen address '{listen}'")))?;

        let handshake_id = cli.id.unwrap_or(toml_config.client.handshake_id);
        if handshake_id.as_bytes().contains(&crate::protocols::broker::HANDSHAKE_DELIMITER) {
            return Err(ConfigError::Invalid(format!(
                "handshake id '{handshake_id}' must not contain '$'"
            )));
        }

        Ok(Config {
            mode: cli.mode,
            listen,
            connect: cli.connect.unwrap_or(toml_config.client.connect),
            max_connections: toml_config.server.max_connections,
            idle_timeout: cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout),
            header: cli.header.unwrap_or(toml_config.protocol.header),
            max_frame_size: toml_config.protocol.max_frame_size,
            reconnect_interval: toml_config.client.reconnect_interval,
            keepalive_interval: cli.keepalive.unwrap_or(toml_config.client.keepalive_interval),
            keepalive_payload: toml_config.client.keepalive_payload,
            handshake_id,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    pub fn codec(&self) -> Codec {
        let encoding = match self.header {
            HeaderType::Binary => HeaderEncoding::Binary,
            HeaderType::Decimal => HeaderEncoding::Decimal,
        };
        Codec::new(encoding, self.max_frame_size)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new(self.codec(), self.idle_timeout)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            session: self.session_options(),
            reconnect_interval: Duration::from_secs(self.reconnect_interval),
            keepalive_interval: (self.keepalive_interval > 0)
                .then(|| Duration::from_secs(self.keepalive_interval)),
            keepalive_payload: Bytes::from(self.keepalive_payload.clone().into_bytes()),
            handshake_id: self.handshake_id.clone(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("framewire").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:3200");
        assert_eq!(config.server.max_connections, 10000);
        assert_eq!(config.server.idle_timeout, 0);
        assert_eq!(config.client.reconnect_interval, 3);
        assert_eq!(config.protocol.header, HeaderType::Binary);
        assert_eq!(config.protocol.max_frame_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:4000"
            max_connections = 64
            idle_timeout = 30

            [client]
            connect = "10.0.0.1:4000"
            keepalive_interval = 5
            handshake_id = "room"

            [protocol]
            header = "decimal"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:4000");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.idle_timeout, 30);
        assert_eq!(config.client.connect, "10.0.0.1:4000");
        assert_eq!(config.client.keepalive_interval, 5);
        assert_eq!(config.client.keepalive_payload, "hello");
        assert_eq!(config.client.handshake_id, "room");
        assert_eq!(config.protocol.header, HeaderType::Decimal);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            idle_timeout = 30
            [protocol]
            header = "decimal"
            max_frame_size = 512
            "#,
        )
        .unwrap();

        let config =
            Config::merge(cli(&["--mode", "broker", "-t", "5", "--header", "binary"]), file).unwrap();
        assert_eq!(config.mode, Mode::Broker);
        assert_eq!(config.idle_timeout, 5);
        assert_eq!(config.header, HeaderType::Binary);
        assert_eq!(config.codec(), Codec::new(HeaderEncoding::Binary, 512));
        assert_eq!(config.codec().encoding(), HeaderEncoding::Binary);
        assert_eq!(
            config.session_options().idle_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_client_options() {
        let config = Config::merge(cli(&["--keepalive", "2", "--id", "abc"]), TomlConfig::default())
            .unwrap();
        let options = config.client_options();
        assert_eq!(options.keepalive_interval, Some(Duration::from_secs(2)));
        assert_eq!(options.reconnect_interval, Duration::from_secs(3));
        assert_eq!(options.handshake_id, "abc");
        assert_eq!(&options.keepalive_payload[..], b"hello");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::merge(cli(&["-l", "not-an-address"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::merge(cli(&["--id", "a$b"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
