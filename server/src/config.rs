use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::RegistryConfig;

/// Command-line flags. Every field is optional and absent flags are skipped
/// during serialization, so the CLI layer of the precedence merge only
/// contributes keys the user actually passed; the hard defaults live solely
/// in `Config::default()` at the bottom of the stack.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "drift-server", version, about = "DRIFT signaling server")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "DRIFT_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, env = "DRIFT_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "DRIFT_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    generate_config: bool,

    /// Seconds an idle token (no socket, no room) survives before deletion
    #[arg(long, env = "DRIFT_TOKEN_IDLE_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    token_idle_secs: Option<u64>,

    /// Seconds a room survives a member's disconnect before deletion
    #[arg(long, env = "DRIFT_ROOM_RECONNECT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    room_reconnect_secs: Option<u64>,

    /// Hard cap in seconds on room age regardless of member state
    #[arg(long, env = "DRIFT_ROOM_MAX_AGE_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    room_max_age_secs: Option<u64>,

    /// Interval in seconds between hard room-age sweeps
    #[arg(long, env = "DRIFT_SWEEP_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    sweep_interval_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub token_idle_secs: u64,
    pub room_reconnect_secs: u64,
    pub room_max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3536,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            token_idle_secs: 300,
            room_reconnect_secs: 120,
            room_max_age_secs: 600,
            sweep_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DRIFT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| "./drift.toml".to_string());

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DRIFT_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// The garbage-collection timings for the registry.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            token_idle_ttl: Duration::from_secs(self.token_idle_secs),
            room_reconnect_ttl: Duration::from_secs(self.room_reconnect_secs),
            room_max_age: Duration::from_secs(self.room_max_age_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# DRIFT Signaling Server Configuration
# Place this file at ./drift.toml or specify with --config <path>
# All settings can be overridden via environment variables (DRIFT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3536)
# port = 3536

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Seconds an idle identity token survives with no socket and no room
# token_idle_secs = 300

# Seconds a room survives a member's disconnect (reconnect grace window)
# room_reconnect_secs = 120

# Hard cap in seconds on room age, a safety net against leaks
# room_max_age_secs = 600

# Interval in seconds between hard room-age sweeps
# sweep_interval_secs = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli::parse_from(["drift-server"])
    }

    #[test]
    fn defaults_apply_without_file_env_or_flags() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::from_cli(bare_cli())?;
            assert_eq!(config.port, 3536);
            assert_eq!(config.room_max_age_secs, 600);
            assert!(!config.json_logs);
            Ok(())
        });
    }

    #[test]
    fn toml_values_survive_when_no_flags_are_passed() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("drift.toml", "room_max_age_secs = 3600\nport = 4000\n")?;
            let config = Config::from_cli(bare_cli())?;
            assert_eq!(config.room_max_age_secs, 3600);
            assert_eq!(config.port, 4000);
            assert_eq!(config.room_reconnect_secs, 120, "untouched keys keep defaults");
            Ok(())
        });
    }

    #[test]
    fn cli_flags_override_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("drift.toml", "port = 4000\n")?;
            let cli = Cli::parse_from(["drift-server", "--port", "5000"]);
            let config = Config::from_cli(cli)?;
            assert_eq!(config.port, 5000);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("drift.toml", "port = 4000\n")?;
            jail.set_env("DRIFT_PORT", "4500");
            let config = Config::from_cli(bare_cli())?;
            assert_eq!(config.port, 4500);
            Ok(())
        });
    }
}
