//! OS service managers behind one capability trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, ServiceScope};
use crate::error::EngineResult;
use crate::launcher::ScriptKind;

pub mod fake;
#[cfg(unix)]
pub mod launchd;
pub mod systemd;
pub mod windows;

pub use fake::FakeBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
	Running,
	Stopped,
}

/// Restart-on-failure schedule applied at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
	pub first_delay: Duration,
	pub second_delay: Duration,
	pub subsequent_delay: Duration,
	/// Failure counter resets after this long without a failure.
	pub reset_after: Duration,
}

impl Default for RecoveryPolicy {
	fn default() -> Self {
		Self {
			first_delay: Duration::from_secs(60),
			second_delay: Duration::from_secs(60),
			subsequent_delay: Duration::from_secs(300),
			reset_after: Duration::from_secs(86_400),
		}
	}
}

/// Everything a backend needs to register one service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
	pub name: String,
	pub display_name: String,
	pub description: String,
	pub launcher: PathBuf,
	pub working_dir: PathBuf,
	pub log_file: PathBuf,
	pub env: HashMap<String, String>,
	pub recovery: RecoveryPolicy,
}

/// Per-user login entry pointing at a startup script.
#[derive(Debug, Clone)]
pub struct StartupEntry {
	pub key: String,
	pub display_name: String,
	pub script: PathBuf,
}

#[async_trait]
pub trait ServiceBackend: Send + Sync {
	fn name(&self) -> &'static str;

	/// Kind of launcher script the registered service runs.
	fn script_kind(&self) -> ScriptKind;

	/// `None` when no service is registered under `name`.
	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>>;

	/// Registers the service for automatic start at boot. Does not start it.
	async fn create(&self, spec: &ServiceSpec) -> EngineResult<()>;

	async fn delete(&self, name: &str) -> EngineResult<()>;

	/// Requests the transition; the caller polls `query` for completion.
	async fn start(&self, name: &str) -> EngineResult<()>;

	async fn stop(&self, name: &str) -> EngineResult<()>;

	async fn register_startup(&self, entry: &StartupEntry) -> EngineResult<()>;

	/// Removing an entry that does not exist succeeds.
	async fn unregister_startup(&self, key: &str) -> EngineResult<()>;
}

/// Native service manager for the running OS.
pub fn platform_backend(config: &EngineConfig) -> Arc<dyn ServiceBackend> {
	let scope = config.services.scope;
	let tool_timeout = Duration::from_millis(config.services.control_timeout_ms);
	native(scope, tool_timeout)
}

#[cfg(target_os = "macos")]
fn native(scope: ServiceScope, tool_timeout: Duration) -> Arc<dyn ServiceBackend> {
	Arc::new(launchd::LaunchdBackend::new(scope, tool_timeout))
}

#[cfg(windows)]
fn native(_scope: ServiceScope, tool_timeout: Duration) -> Arc<dyn ServiceBackend> {
	Arc::new(windows::WindowsBackend::new(tool_timeout))
}

#[cfg(all(not(target_os = "macos"), not(windows)))]
fn native(scope: ServiceScope, tool_timeout: Duration) -> Arc<dyn ServiceBackend> {
	Arc::new(systemd::SystemdBackend::new(scope, tool_timeout))
}
