use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{RecoveryPolicy, ServiceBackend, ServiceSpec, ServiceState, StartupEntry};
use crate::config::EngineConfig;
use crate::descriptor::ApplicationDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::launcher::{self, ScriptKind};
use crate::paths::EnginePaths;

/// Slack added on top of `transition_timeout` for the whole start/stop.
const OUTER_SLACK: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RegistrarConfig {
	pub log_dir: PathBuf,
	/// Generated service launcher scripts.
	pub services_dir: PathBuf,
	/// Generated login launcher scripts.
	pub startup_dir: PathBuf,
	pub query_timeout: Duration,
	pub transition_timeout: Duration,
	/// Bound on registration and removal.
	pub control_timeout: Duration,
	pub poll_interval: Duration,
	pub recovery: RecoveryPolicy,
}

impl RegistrarConfig {
	pub fn new(state_dir: impl AsRef<Path>) -> Self {
		let state_dir = state_dir.as_ref();
		let services = crate::config::ServicesConfig::default();
		Self {
			log_dir: state_dir.join("logs"),
			services_dir: state_dir.join("services"),
			startup_dir: state_dir.join("startup"),
			query_timeout: Duration::from_millis(services.query_timeout_ms),
			transition_timeout: Duration::from_millis(services.transition_timeout_ms),
			control_timeout: Duration::from_millis(services.control_timeout_ms),
			poll_interval: POLL_INTERVAL,
			recovery: RecoveryPolicy::default(),
		}
	}

	pub fn from_engine(config: &EngineConfig, paths: &EnginePaths) -> Self {
		Self {
			log_dir: config.log_dir(paths),
			services_dir: paths.services_dir(),
			startup_dir: paths.startup_dir(),
			query_timeout: Duration::from_millis(config.services.query_timeout_ms),
			transition_timeout: Duration::from_millis(config.services.transition_timeout_ms),
			control_timeout: Duration::from_millis(config.services.control_timeout_ms),
			poll_interval: POLL_INTERVAL,
			recovery: RecoveryPolicy::default(),
		}
	}
}

/// Registers descriptors as OS services and drives them. Every call into the
/// service manager is time-bounded; probes degrade to "absent"/"stopped"
/// instead of failing.
pub struct ServiceRegistrar {
	backend: Arc<dyn ServiceBackend>,
	pub config: RegistrarConfig,
}

impl ServiceRegistrar {
	pub fn new(backend: Arc<dyn ServiceBackend>, config: RegistrarConfig) -> Self {
		Self { backend, config }
	}

	pub fn backend_name(&self) -> &'static str {
		self.backend.name()
	}

	// --- Probes ---

	pub async fn service_exists(&self, name: &str) -> bool {
		match self.query(name).await {
			Ok(state) => state.is_some(),
			Err(e) => {
				tracing::debug!("{}: existence probe failed: {}", name, e);
				false
			}
		}
	}

	pub async fn status(&self, name: &str) -> ServiceState {
		match self.query(name).await {
			Ok(Some(state)) => state,
			Ok(None) => ServiceState::Stopped,
			Err(e) => {
				tracing::debug!("{}: status probe failed: {}", name, e);
				ServiceState::Stopped
			}
		}
	}

	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>> {
		bounded(self.config.query_timeout, &format!("query {}", name), self.backend.query(name)).await
	}

	// --- Registration ---

	/// Writes the launcher script and registers the service under the
	/// descriptor's service identifier. Partial artifacts are left in place on
	/// failure.
	pub async fn install(&self, app: &ApplicationDescriptor) -> EngineResult<()> {
		let name = app.service_identifier();
		let kind = self.backend.script_kind();
		let launcher_path = self.launcher_path(&name, kind);
		let log_file = app.service_log_path(&self.config.log_dir);

		std::fs::create_dir_all(&self.config.log_dir)
			.map_err(|e| EngineError::from_io("create log dir", e))?;
		launcher::write_script(&launcher_path, &launcher::service_script(app, kind, &log_file))?;

		let display = app.display_name();
		let spec = ServiceSpec {
			name: name.clone(),
			display_name: format!("AlwaysDown - {}", display),
			description: format!("Application service for {} - {}", display, app.description),
			launcher: launcher_path,
			working_dir: app.effective_working_directory(),
			log_file,
			env: app.environment_variables.clone(),
			recovery: self.config.recovery,
		};

		bounded(self.config.control_timeout, &format!("create {}", name), self.backend.create(&spec)).await?;
		tracing::info!("installed service {} ({})", name, self.backend.name());
		Ok(())
	}

	/// Removes the service and its launcher script. A service the manager
	/// reports as absent is not an error; a manager that cannot answer is.
	pub async fn uninstall(&self, name: &str) -> EngineResult<()> {
		if self.query(name).await?.is_some() {
			if let Err(e) = self.stop(name).await {
				tracing::warn!("{}: stop before uninstall failed: {}", name, e);
			}
			bounded(self.config.control_timeout, &format!("delete {}", name), self.backend.delete(name)).await?;
			tracing::info!("uninstalled service {}", name);
		}

		// Also covers a script left behind by an install whose registration failed.
		let launcher_path = self.launcher_path(name, self.backend.script_kind());
		if launcher_path.exists() {
			if let Err(e) = std::fs::remove_file(&launcher_path) {
				tracing::warn!("failed to remove {}: {}", launcher_path.display(), e);
			}
		}
		Ok(())
	}

	// --- Transitions ---

	pub async fn start(&self, name: &str) -> EngineResult<()> {
		self.transition(name, ServiceState::Running).await
	}

	pub async fn stop(&self, name: &str) -> EngineResult<()> {
		self.transition(name, ServiceState::Stopped).await
	}

	async fn transition(&self, name: &str, target: ServiceState) -> EngineResult<()> {
		let outer = self.config.transition_timeout + OUTER_SLACK;
		match tokio::time::timeout(outer, self.drive(name, target)).await {
			Ok(result) => result,
			Err(_) => Err(EngineError::Timeout(format!(
				"{} did not reach {:?} within {:?}",
				name, target, outer
			))),
		}
	}

	async fn drive(&self, name: &str, target: ServiceState) -> EngineResult<()> {
		match self.query(name).await? {
			None => return Err(EngineError::NotFound(format!("service {}", name))),
			Some(state) if state == target => return Ok(()),
			Some(_) => {}
		}

		match target {
			ServiceState::Running => self.backend.start(name).await?,
			ServiceState::Stopped => self.backend.stop(name).await?,
		}

		let wait = async {
			loop {
				match self.query(name).await {
					Ok(Some(state)) if state == target => return,
					Ok(_) => {}
					Err(e) => tracing::debug!("{}: poll failed: {}", name, e),
				}
				tokio::time::sleep(self.config.poll_interval).await;
			}
		};
		tokio::time::timeout(self.config.transition_timeout, wait)
			.await
			.map_err(|_| {
				EngineError::Timeout(format!(
					"{} did not reach {:?} within {:?}",
					name, target, self.config.transition_timeout
				))
			})
	}

	// --- Rename ---

	/// Moves the service registered under `old_name` to the descriptor's
	/// current service identifier. If the old service cannot be removed the
	/// new one is not installed. Not transactional: a failed install after the
	/// old service was removed leaves nothing registered.
	pub async fn migrate(&self, old_name: &str, app: &ApplicationDescriptor) -> EngineResult<()> {
		let new_name = app.service_identifier();
		if old_name == new_name {
			return Ok(());
		}
		if !self.service_exists(old_name).await {
			return Ok(());
		}
		if self.service_exists(&new_name).await {
			return Err(EngineError::AlreadyExists(format!(
				"cannot migrate {} to {}: a service with that name already exists",
				old_name, new_name
			)));
		}

		if let Err(e) = self.stop(old_name).await {
			tracing::warn!("{}: stop before migrate failed: {}", old_name, e);
		}
		if let Err(e) = self.uninstall(old_name).await {
			tracing::error!("{}: uninstall before migrate failed: {}", old_name, e);
			return Err(e);
		}

		self.install(app).await?;
		tracing::info!("migrated service {} -> {}", old_name, new_name);
		Ok(())
	}

	// --- Login autostart ---

	pub async fn set_autostart(&self, app: &ApplicationDescriptor, enabled: bool) -> EngineResult<()> {
		let key = app.startup_key();
		let script = self.startup_script_path(&key);

		if enabled {
			let kind = self.backend.script_kind();
			let log_file = app.log_file_path(&self.config.log_dir);
			launcher::write_script(&script, &launcher::startup_script(app, kind, &log_file))?;
			let entry = StartupEntry {
				key,
				display_name: app.display_name(),
				script,
			};
			bounded(
				self.config.control_timeout,
				"register startup entry",
				self.backend.register_startup(&entry),
			)
			.await
		} else {
			bounded(
				self.config.control_timeout,
				"remove startup entry",
				self.backend.unregister_startup(&key),
			)
			.await?;
			match std::fs::remove_file(&script) {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
				Err(e) => Err(EngineError::from_io("remove startup script", e)),
			}
		}
	}

	// --- Service log ---

	pub fn service_log_path(&self, app: &ApplicationDescriptor) -> PathBuf {
		app.service_log_path(&self.config.log_dir)
	}

	pub fn read_service_log(&self, app: &ApplicationDescriptor) -> String {
		let path = self.service_log_path(app);
		match std::fs::read_to_string(&path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => "No service logs found.".to_string(),
			Err(e) => format!("Error reading service logs: {}", e),
		}
	}

	// --- Paths ---

	pub fn launcher_path(&self, name: &str, kind: ScriptKind) -> PathBuf {
		self.config.services_dir.join(format!("{}.{}", name, kind.extension()))
	}

	fn startup_script_path(&self, key: &str) -> PathBuf {
		self.config
			.startup_dir
			.join(format!("{}.{}", key, self.backend.script_kind().extension()))
	}
}

async fn bounded<T>(
	limit: Duration,
	what: &str,
	fut: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
	match tokio::time::timeout(limit, fut).await {
		Ok(result) => result,
		Err(_) => Err(EngineError::Timeout(format!("{} did not finish within {:?}", what, limit))),
	}
}
