use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{RecoveryPolicy, ServiceBackend, ServiceSpec, ServiceState, StartupEntry};
use crate::config::ServiceScope;
use crate::control::{run_tool, ToolOutput};
use crate::error::{EngineError, EngineResult};
use crate::launcher::ScriptKind;
use crate::paths::home_dir;

/// systemd units: `/etc/systemd/system` for the system scope,
/// `~/.config/systemd/user` (driven with `--user`) for the user scope.
pub struct SystemdBackend {
	scope: ServiceScope,
	unit_dir: PathBuf,
	autostart_dir: PathBuf,
	tool_timeout: Duration,
}

impl SystemdBackend {
	pub fn new(scope: ServiceScope, tool_timeout: Duration) -> Self {
		let config_home = std::env::var_os("XDG_CONFIG_HOME")
			.map(PathBuf::from)
			.or_else(|| home_dir().map(|h| h.join(".config")))
			.unwrap_or_else(|| std::env::temp_dir().join(".config"));

		let unit_dir = match scope {
			ServiceScope::System => PathBuf::from("/etc/systemd/system"),
			ServiceScope::User => config_home.join("systemd").join("user"),
		};

		Self {
			scope,
			unit_dir,
			autostart_dir: config_home.join("autostart"),
			tool_timeout,
		}
	}

	fn unit_path(&self, name: &str) -> PathBuf {
		self.unit_dir.join(unit_name(name))
	}

	async fn systemctl(&self, args: &[&str]) -> EngineResult<ToolOutput> {
		let mut full: Vec<&str> = Vec::with_capacity(args.len() + 1);
		if self.scope == ServiceScope::User {
			full.push("--user");
		}
		full.extend_from_slice(args);
		run_tool("systemctl", &full, self.tool_timeout).await
	}

	fn wanted_by(&self) -> &'static str {
		match self.scope {
			ServiceScope::System => "multi-user.target",
			ServiceScope::User => "default.target",
		}
	}
}

fn unit_name(name: &str) -> String {
	format!("{}.service", name)
}

/// Values inside unit files: specifiers and quotes need escaping.
fn unit_escape(s: &str) -> String {
	s.replace('%', "%%").replace('"', "\\\"").replace('\n', " ")
}

/// Path settings like `WorkingDirectory=` take the rest of the line verbatim
/// and are not unquoted, so only specifiers are escaped.
fn unit_path_value(path: &Path) -> String {
	path.to_string_lossy().replace('%', "%%").replace('\n', " ")
}

/// systemd has no per-attempt delay list, so the unit restarts after
/// `first_delay` every time and never gives up. The longer
/// `subsequent_delay` and the `reset_after` window are not rendered; a unit
/// comes back no later than the policy asks.
fn render_restart(recovery: &RecoveryPolicy) -> String {
	format!(
		"Restart=on-failure\nRestartSec={}\n",
		recovery.first_delay.as_secs()
	)
}

pub fn render_unit(spec: &ServiceSpec, wanted_by: &str) -> String {
	let mut unit = String::new();
	unit.push_str("[Unit]\n");
	unit.push_str(&format!("Description={}\n", unit_escape(&spec.display_name)));
	unit.push_str("After=network.target\n");
	unit.push_str("StartLimitIntervalSec=0\n\n");

	unit.push_str("[Service]\n");
	unit.push_str("Type=simple\n");
	unit.push_str(&format!("WorkingDirectory={}\n", unit_path_value(&spec.working_dir)));
	unit.push_str(&format!("ExecStart=/bin/sh \"{}\"\n", unit_escape(&spec.launcher.to_string_lossy())));
	let mut keys: Vec<&String> = spec.env.keys().collect();
	keys.sort();
	for key in keys {
		unit.push_str(&format!("Environment=\"{}={}\"\n", key, unit_escape(&spec.env[key])));
	}
	unit.push_str(&render_restart(&spec.recovery));
	unit.push_str("\n[Install]\n");
	unit.push_str(&format!("WantedBy={}\n", wanted_by));
	unit
}

/// Reads `LoadState`/`ActiveState` out of `systemctl show`.
fn parse_show(stdout: &str) -> Option<ServiceState> {
	let mut load = "";
	let mut active = "";
	for line in stdout.lines() {
		if let Some(v) = line.strip_prefix("LoadState=") {
			load = v.trim();
		} else if let Some(v) = line.strip_prefix("ActiveState=") {
			active = v.trim();
		}
	}
	match load {
		"" | "not-found" => None,
		_ if active == "active" || active == "reloading" => Some(ServiceState::Running),
		_ => Some(ServiceState::Stopped),
	}
}

#[async_trait]
impl ServiceBackend for SystemdBackend {
	fn name(&self) -> &'static str {
		"systemd"
	}

	fn script_kind(&self) -> ScriptKind {
		ScriptKind::Sh
	}

	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>> {
		let unit = unit_name(name);
		let out = self
			.systemctl(&["show", &unit, "--property=LoadState,ActiveState"])
			.await?
			.check("systemctl show")?;
		Ok(parse_show(&out.stdout))
	}

	async fn create(&self, spec: &ServiceSpec) -> EngineResult<()> {
		std::fs::create_dir_all(&self.unit_dir)
			.map_err(|e| EngineError::from_io("create unit dir", e))?;
		let path = self.unit_path(&spec.name);
		std::fs::write(&path, render_unit(spec, self.wanted_by()))
			.map_err(|e| EngineError::from_io(&format!("write {}", path.display()), e))?;
		tracing::info!("wrote unit {}", path.display());

		self.systemctl(&["daemon-reload"]).await?.check("systemctl daemon-reload")?;
		let unit = unit_name(&spec.name);
		self.systemctl(&["enable", &unit]).await?.check("systemctl enable")?;
		Ok(())
	}

	async fn delete(&self, name: &str) -> EngineResult<()> {
		let unit = unit_name(name);
		if let Err(e) = self.systemctl(&["disable", &unit]).await.and_then(|o| o.check("systemctl disable")) {
			tracing::warn!("{}: {}", unit, e);
		}

		let path = self.unit_path(name);
		if path.exists() {
			std::fs::remove_file(&path)
				.map_err(|e| EngineError::from_io(&format!("remove {}", path.display()), e))?;
		}
		self.systemctl(&["daemon-reload"]).await?.check("systemctl daemon-reload")?;
		let _ = self.systemctl(&["reset-failed", &unit]).await;
		Ok(())
	}

	async fn start(&self, name: &str) -> EngineResult<()> {
		let unit = unit_name(name);
		self.systemctl(&["start", "--no-block", &unit]).await?.check("systemctl start")?;
		Ok(())
	}

	async fn stop(&self, name: &str) -> EngineResult<()> {
		let unit = unit_name(name);
		self.systemctl(&["stop", "--no-block", &unit]).await?.check("systemctl stop")?;
		Ok(())
	}

	async fn register_startup(&self, entry: &StartupEntry) -> EngineResult<()> {
		std::fs::create_dir_all(&self.autostart_dir)
			.map_err(|e| EngineError::from_io("create autostart dir", e))?;
		let desktop = format!(
			"[Desktop Entry]\nType=Application\nName=AlwaysDown - {}\nExec=/bin/sh \"{}\"\nX-GNOME-Autostart-enabled=true\nNoDisplay=true\n",
			entry.display_name.replace('\n', " "),
			entry.script.to_string_lossy()
		);
		let path = self.autostart_dir.join(format!("{}.desktop", entry.key));
		std::fs::write(&path, desktop)
			.map_err(|e| EngineError::from_io(&format!("write {}", path.display()), e))
	}

	async fn unregister_startup(&self, key: &str) -> EngineResult<()> {
		let path = self.autostart_dir.join(format!("{}.desktop", key));
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::from_io(&format!("remove {}", path.display()), e)),
		}
	}
}
