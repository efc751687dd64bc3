use async_trait::async_trait;
use std::time::Duration;

use super::{RecoveryPolicy, ServiceBackend, ServiceSpec, ServiceState, StartupEntry};
use crate::control::{run_tool, ToolOutput};
use crate::error::EngineResult;
use crate::launcher::ScriptKind;

const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

// sc.exe / Win32 error codes
const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;

/// Windows services through `sc.exe`, login entries through `reg.exe`.
pub struct WindowsBackend {
	tool_timeout: Duration,
}

impl WindowsBackend {
	pub fn new(tool_timeout: Duration) -> Self {
		Self { tool_timeout }
	}

	async fn sc(&self, args: &[&str]) -> EngineResult<ToolOutput> {
		run_tool("sc", args, self.tool_timeout).await
	}
}

/// `sc failure` actions string for a recovery policy.
pub fn failure_actions(policy: &RecoveryPolicy) -> String {
	format!(
		"restart/{}/restart/{}/restart/{}",
		policy.first_delay.as_millis(),
		policy.second_delay.as_millis(),
		policy.subsequent_delay.as_millis()
	)
}

fn parse_sc_query(out: &ToolOutput) -> Option<ServiceState> {
	if out.code == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
		return None;
	}
	let state_line = out.stdout.lines().find(|l| l.trim_start().starts_with("STATE"));
	match state_line {
		Some(line) if line.contains("RUNNING") => Some(ServiceState::Running),
		_ => Some(ServiceState::Stopped),
	}
}

#[async_trait]
impl ServiceBackend for WindowsBackend {
	fn name(&self) -> &'static str {
		"sc"
	}

	fn script_kind(&self) -> ScriptKind {
		ScriptKind::Bat
	}

	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>> {
		let out = self.sc(&["query", name]).await?;
		if out.code == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
			return Ok(None);
		}
		let out = out.check("sc query")?;
		Ok(parse_sc_query(&out))
	}

	async fn create(&self, spec: &ServiceSpec) -> EngineResult<()> {
		let bin_path = format!("cmd.exe /c \"{}\"", spec.launcher.to_string_lossy());
		self.sc(&[
			"create",
			&spec.name,
			"binPath=",
			&bin_path,
			"DisplayName=",
			&spec.display_name,
			"start=",
			"auto",
		])
		.await?
		.check("sc create")?;

		self.sc(&["description", &spec.name, &spec.description])
			.await?
			.check("sc description")?;

		let reset = spec.recovery.reset_after.as_secs().to_string();
		let actions = failure_actions(&spec.recovery);
		self.sc(&["failure", &spec.name, "reset=", &reset, "actions=", &actions])
			.await?
			.check("sc failure")?;
		Ok(())
	}

	async fn delete(&self, name: &str) -> EngineResult<()> {
		self.sc(&["delete", name]).await?.check("sc delete")?;
		Ok(())
	}

	async fn start(&self, name: &str) -> EngineResult<()> {
		let out = self.sc(&["start", name]).await?;
		if out.code == Some(ERROR_SERVICE_ALREADY_RUNNING) {
			return Ok(());
		}
		out.check("sc start")?;
		Ok(())
	}

	async fn stop(&self, name: &str) -> EngineResult<()> {
		let out = self.sc(&["stop", name]).await?;
		if out.code == Some(ERROR_SERVICE_NOT_ACTIVE) {
			return Ok(());
		}
		out.check("sc stop")?;
		Ok(())
	}

	async fn register_startup(&self, entry: &StartupEntry) -> EngineResult<()> {
		let data = format!("\"{}\"", entry.script.to_string_lossy());
		run_tool(
			"reg",
			&["add", RUN_KEY, "/v", &entry.key, "/t", "REG_SZ", "/d", &data, "/f"],
			self.tool_timeout,
		)
		.await?
		.check("reg add")?;
		Ok(())
	}

	async fn unregister_startup(&self, key: &str) -> EngineResult<()> {
		let out = run_tool("reg", &["delete", RUN_KEY, "/v", key, "/f"], self.tool_timeout).await?;
		// reg exits 1 when the value is already gone
		if out.code == Some(1) && !out.looks_like_access_denied() {
			return Ok(());
		}
		out.check("reg delete")?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn out(code: i32, stdout: &str) -> ToolOutput {
		ToolOutput { code: Some(code), stdout: stdout.into(), stderr: String::new() }
	}

	#[test]
	fn test_failure_actions() {
		assert_eq!(
			failure_actions(&RecoveryPolicy::default()),
			"restart/60000/restart/60000/restart/300000"
		);
	}

	#[test]
	fn test_parse_sc_query() {
		let running = "SERVICE_NAME: AlwaysDown_Api\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : 4  RUNNING\n";
		let stopped = "SERVICE_NAME: AlwaysDown_Api\n        STATE              : 1  STOPPED\n";
		assert_eq!(parse_sc_query(&out(0, running)), Some(ServiceState::Running));
		assert_eq!(parse_sc_query(&out(0, stopped)), Some(ServiceState::Stopped));
		assert_eq!(parse_sc_query(&out(1060, "")), None);
	}
}
