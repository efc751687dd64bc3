use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::{ServiceBackend, ServiceSpec, ServiceState, StartupEntry};
use crate::config::ServiceScope;
use crate::control::run_tool;
use crate::error::{EngineError, EngineResult};
use crate::launcher::ScriptKind;
use crate::paths::home_dir;

/// launchd jobs: `/Library/LaunchDaemons` in the `system` domain, or
/// `~/Library/LaunchAgents` in `gui/<uid>`.
pub struct LaunchdBackend {
	scope: ServiceScope,
	tool_timeout: Duration,
}

impl LaunchdBackend {
	pub fn new(scope: ServiceScope, tool_timeout: Duration) -> Self {
		Self { scope, tool_timeout }
	}

	fn jobs_dir(&self) -> PathBuf {
		match self.scope {
			ServiceScope::System => PathBuf::from("/Library/LaunchDaemons"),
			ServiceScope::User => user_agents_dir(),
		}
	}

	fn plist_path(&self, label: &str) -> PathBuf {
		self.jobs_dir().join(format!("{}.plist", label))
	}

	fn domain(&self) -> String {
		match self.scope {
			ServiceScope::System => "system".to_string(),
			ServiceScope::User => format!("gui/{}", nix::unistd::getuid().as_raw()),
		}
	}

	async fn loaded_jobs(&self) -> EngineResult<BTreeMap<String, (Option<u32>, Option<i32>)>> {
		let out = run_tool("launchctl", &["list"], self.tool_timeout)
			.await?
			.check("launchctl list")?;
		Ok(parse_launchctl_list(&out.stdout))
	}
}

fn user_agents_dir() -> PathBuf {
	home_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("Library")
		.join("LaunchAgents")
}

/// `launchctl list` rows: `PID<TAB>Status<TAB>Label`, `-` for no value.
fn parse_launchctl_list(stdout: &str) -> BTreeMap<String, (Option<u32>, Option<i32>)> {
	let mut map = BTreeMap::new();
	for line in stdout.lines().skip(1) {
		let parts: Vec<&str> = line.split('\t').collect();
		if parts.len() < 3 {
			continue;
		}
		let pid = parts[0].trim().parse::<u32>().ok();
		let exit_code = parts[1].trim().parse::<i32>().ok();
		let label = parts[2].trim().to_string();
		map.insert(label, (pid, exit_code));
	}
	map
}

pub fn render_plist(spec: &ServiceSpec) -> plist::Value {
	let mut dict = plist::Dictionary::new();
	dict.insert("Label".to_string(), plist::Value::String(spec.name.clone()));
	dict.insert(
		"ProgramArguments".to_string(),
		plist::Value::Array(vec![
			plist::Value::String("/bin/sh".to_string()),
			plist::Value::String(spec.launcher.to_string_lossy().to_string()),
		]),
	);
	dict.insert(
		"WorkingDirectory".to_string(),
		plist::Value::String(spec.working_dir.to_string_lossy().to_string()),
	);
	dict.insert("RunAtLoad".to_string(), plist::Value::Boolean(true));

	// Restart only after a failed exit, no sooner than the first delay.
	let mut keep_alive = plist::Dictionary::new();
	keep_alive.insert("SuccessfulExit".to_string(), plist::Value::Boolean(false));
	dict.insert("KeepAlive".to_string(), plist::Value::Dictionary(keep_alive));
	dict.insert(
		"ThrottleInterval".to_string(),
		plist::Value::Integer((spec.recovery.first_delay.as_secs() as i64).into()),
	);

	let log = spec.log_file.to_string_lossy().to_string();
	dict.insert("StandardOutPath".to_string(), plist::Value::String(log.clone()));
	dict.insert("StandardErrorPath".to_string(), plist::Value::String(log));

	if !spec.env.is_empty() {
		let mut env_dict = plist::Dictionary::new();
		for (k, v) in &spec.env {
			env_dict.insert(k.clone(), plist::Value::String(v.clone()));
		}
		dict.insert("EnvironmentVariables".to_string(), plist::Value::Dictionary(env_dict));
	}

	plist::Value::Dictionary(dict)
}

fn write_plist(path: &PathBuf, value: &plist::Value) -> EngineResult<()> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir).map_err(|e| EngineError::from_io("create launchd dir", e))?;
	}
	let file = std::fs::File::create(path)
		.map_err(|e| EngineError::from_io(&format!("write {}", path.display()), e))?;
	value
		.to_writer_xml(file)
		.map_err(|e| EngineError::ControlFailure(format!("write {}: {}", path.display(), e)))
}

#[async_trait]
impl ServiceBackend for LaunchdBackend {
	fn name(&self) -> &'static str {
		"launchd"
	}

	fn script_kind(&self) -> ScriptKind {
		ScriptKind::Sh
	}

	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>> {
		let loaded = self.loaded_jobs().await?;
		match loaded.get(name) {
			Some((Some(_pid), _)) => Ok(Some(ServiceState::Running)),
			Some((None, _)) => Ok(Some(ServiceState::Stopped)),
			None if self.plist_path(name).exists() => Ok(Some(ServiceState::Stopped)),
			None => Ok(None),
		}
	}

	async fn create(&self, spec: &ServiceSpec) -> EngineResult<()> {
		let path = self.plist_path(&spec.name);
		write_plist(&path, &render_plist(spec))?;
		tracing::info!("wrote {}", path.display());
		Ok(())
	}

	async fn delete(&self, name: &str) -> EngineResult<()> {
		let target = format!("{}/{}", self.domain(), name);
		if let Err(e) = run_tool("launchctl", &["bootout", &target], self.tool_timeout).await {
			tracing::warn!("{}: bootout failed: {}", name, e);
		}
		let path = self.plist_path(name);
		if path.exists() {
			std::fs::remove_file(&path)
				.map_err(|e| EngineError::from_io(&format!("remove {}", path.display()), e))?;
		}
		Ok(())
	}

	async fn start(&self, name: &str) -> EngineResult<()> {
		let domain = self.domain();
		let loaded = self.loaded_jobs().await?.contains_key(name);

		if loaded {
			let target = format!("{}/{}", domain, name);
			run_tool("launchctl", &["kickstart", "-kp", &target], self.tool_timeout)
				.await?
				.check("launchctl kickstart")?;
		} else {
			let path = self.plist_path(name);
			let path = path.to_string_lossy();
			let out = run_tool("launchctl", &["bootstrap", &domain, &path], self.tool_timeout).await?;
			if !out.success() {
				// Older launchctl without bootstrap support
				let legacy = run_tool("launchctl", &["load", &path], self.tool_timeout).await?;
				if !legacy.success() {
					out.check("launchctl bootstrap")?;
				}
			}
		}
		Ok(())
	}

	async fn stop(&self, name: &str) -> EngineResult<()> {
		let target = format!("{}/{}", self.domain(), name);
		let out = run_tool("launchctl", &["bootout", &target], self.tool_timeout).await?;
		if !out.success() {
			let path = self.plist_path(name);
			let legacy = run_tool("launchctl", &["unload", &path.to_string_lossy()], self.tool_timeout).await?;
			if !legacy.success() {
				out.check("launchctl bootout")?;
			}
		}
		Ok(())
	}

	async fn register_startup(&self, entry: &StartupEntry) -> EngineResult<()> {
		let mut dict = plist::Dictionary::new();
		dict.insert("Label".to_string(), plist::Value::String(entry.key.clone()));
		dict.insert(
			"ProgramArguments".to_string(),
			plist::Value::Array(vec![
				plist::Value::String("/bin/sh".to_string()),
				plist::Value::String(entry.script.to_string_lossy().to_string()),
			]),
		);
		dict.insert("RunAtLoad".to_string(), plist::Value::Boolean(true));

		let path = user_agents_dir().join(format!("{}.plist", entry.key));
		write_plist(&path, &plist::Value::Dictionary(dict))
	}

	async fn unregister_startup(&self, key: &str) -> EngineResult<()> {
		let path = user_agents_dir().join(format!("{}.plist", key));
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::from_io(&format!("remove {}", path.display()), e)),
		}
	}
}
