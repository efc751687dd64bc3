use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::{expand_tilde, EnginePaths};

// ── Engine config (~/.config/alwaysdown/config.toml) ────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub supervisor: SupervisorTimeouts,
	#[serde(default)]
	pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	pub dir: Option<String>,
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self { dir: None, max_size_bytes: default_max_size() }
	}
}

fn default_max_size() -> u64 { 10 * 1024 * 1024 }

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorTimeouts {
	#[serde(default = "default_tree_kill_ms")]
	pub tree_kill_ms: u64,
	#[serde(default = "default_kill_grace_ms")]
	pub kill_grace_ms: u64,
	#[serde(default = "default_stop_timeout_ms")]
	pub stop_timeout_ms: u64,
	#[serde(default = "default_restart_delay_ms")]
	pub restart_delay_ms: u64,
}

impl Default for SupervisorTimeouts {
	fn default() -> Self {
		Self {
			tree_kill_ms: default_tree_kill_ms(),
			kill_grace_ms: default_kill_grace_ms(),
			stop_timeout_ms: default_stop_timeout_ms(),
			restart_delay_ms: default_restart_delay_ms(),
		}
	}
}

fn default_tree_kill_ms() -> u64 { 5_000 }
fn default_kill_grace_ms() -> u64 { 5_000 }
fn default_stop_timeout_ms() -> u64 { 15_000 }
fn default_restart_delay_ms() -> u64 { 1_000 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
	/// Machine-wide registration; usually needs root / administrator.
	#[default]
	System,
	/// Per-user registration (systemd --user, gui/<uid> launchd domain).
	User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
	#[serde(default)]
	pub scope: ServiceScope,
	#[serde(default = "default_query_timeout_ms")]
	pub query_timeout_ms: u64,
	#[serde(default = "default_transition_timeout_ms")]
	pub transition_timeout_ms: u64,
	#[serde(default = "default_control_timeout_ms")]
	pub control_timeout_ms: u64,
}

impl Default for ServicesConfig {
	fn default() -> Self {
		Self {
			scope: ServiceScope::default(),
			query_timeout_ms: default_query_timeout_ms(),
			transition_timeout_ms: default_transition_timeout_ms(),
			control_timeout_ms: default_control_timeout_ms(),
		}
	}
}

fn default_query_timeout_ms() -> u64 { 3_000 }
fn default_transition_timeout_ms() -> u64 { 30_000 }
fn default_control_timeout_ms() -> u64 { 60_000 }

impl EngineConfig {
	pub fn log_dir(&self, paths: &EnginePaths) -> PathBuf {
		match &self.logs.dir {
			Some(dir) => expand_tilde(dir),
			None => paths.log_dir(),
		}
	}
}

impl SupervisorTimeouts {
	pub fn tree_kill(&self) -> Duration { Duration::from_millis(self.tree_kill_ms) }
	pub fn kill_grace(&self) -> Duration { Duration::from_millis(self.kill_grace_ms) }
	pub fn stop_timeout(&self) -> Duration { Duration::from_millis(self.stop_timeout_ms) }
	pub fn restart_delay(&self) -> Duration { Duration::from_millis(self.restart_delay_ms) }
}

pub fn load_engine_config(paths: &EnginePaths) -> EngineConfig {
	load_engine_config_from(&paths.config_dir().join("config.toml"))
}

pub fn load_engine_config_from(path: &Path) -> EngineConfig {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	EngineConfig::default()
}

// ── Global settings (owned by the persistence collaborator) ─────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
	#[serde(default = "default_true")]
	pub autostart_on_launch: bool,
	#[serde(default = "default_refresh_interval")]
	pub refresh_interval_ms: u64,
	#[serde(default = "default_retention_days")]
	pub log_retention_days: u32,
	#[serde(default)]
	pub global_environment_variables: HashMap<String, String>,
}

impl Default for GlobalSettings {
	fn default() -> Self {
		Self {
			autostart_on_launch: true,
			refresh_interval_ms: default_refresh_interval(),
			log_retention_days: default_retention_days(),
			global_environment_variables: HashMap::new(),
		}
	}
}

fn default_true() -> bool { true }
fn default_refresh_interval() -> u64 { 5_000 }
fn default_retention_days() -> u32 { 30 }
