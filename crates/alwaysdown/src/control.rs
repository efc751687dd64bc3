use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{EngineError, EngineResult};

/// Captured result of an OS control tool (`systemctl`, `launchctl`, `sc`, …).
#[derive(Debug, Clone)]
pub struct ToolOutput {
	pub code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl ToolOutput {
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}

	/// Best message to surface: stderr, else stdout, else the exit code.
	pub fn message(&self) -> String {
		let err = self.stderr.trim();
		if !err.is_empty() {
			return err.to_string();
		}
		let out = self.stdout.trim();
		if !out.is_empty() {
			return out.to_string();
		}
		match self.code {
			Some(code) => format!("exit code {}", code),
			None => "terminated by signal".to_string(),
		}
	}

	pub fn looks_like_access_denied(&self) -> bool {
		let text = format!("{}\n{}", self.stdout, self.stderr).to_lowercase();
		text.contains("access denied")
			|| text.contains("access is denied")
			|| text.contains("permission denied")
			|| text.contains("authentication required")
			|| text.contains("operation not permitted")
			|| (cfg!(windows) && self.code == Some(5))
	}

	/// Converts a non-zero exit into the matching error kind.
	pub fn check(self, what: &str) -> EngineResult<ToolOutput> {
		if self.success() {
			Ok(self)
		} else if self.looks_like_access_denied() {
			Err(EngineError::PrivilegeRequired(format!("{}: {}", what, self.message())))
		} else {
			Err(EngineError::ControlFailure(format!("{}: {}", what, self.message())))
		}
	}
}

/// Runs a control tool to completion, giving up after `limit`. The child is
/// killed if the wait is abandoned.
pub async fn run_tool(program: &str, args: &[&str], limit: Duration) -> EngineResult<ToolOutput> {
	tracing::debug!("exec: {} {}", program, args.join(" "));

	let child = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.map_err(|e| EngineError::ControlFailure(format!("failed to run {}: {}", program, e)))?;

	let output = tokio::time::timeout(limit, child.wait_with_output())
		.await
		.map_err(|_| EngineError::Timeout(format!("{} did not finish within {:?}", program, limit)))?
		.map_err(|e| EngineError::ControlFailure(format!("{}: {}", program, e)))?;

	Ok(ToolOutput {
		code: output.status.code(),
		stdout: String::from_utf8_lossy(&output.stdout).to_string(),
		stderr: String::from_utf8_lossy(&output.stderr).to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn output(code: i32, stdout: &str, stderr: &str) -> ToolOutput {
		ToolOutput { code: Some(code), stdout: stdout.into(), stderr: stderr.into() }
	}

	#[test]
	fn test_check_classifies_failures() {
		assert!(output(0, "", "").check("x").is_ok());
		assert!(matches!(
			output(1, "", "Failed to start unit: Access denied").check("start"),
			Err(EngineError::PrivilegeRequired(_))
		));
		assert!(matches!(
			output(3, "", "Unit not loaded").check("start"),
			Err(EngineError::ControlFailure(_))
		));
	}

	#[test]
	fn test_message_prefers_stderr() {
		assert_eq!(output(1, "out", "err").message(), "err");
		assert_eq!(output(1, "out", " ").message(), "out");
		assert_eq!(output(7, "", "").message(), "exit code 7");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_run_tool_times_out() {
		let started = std::time::Instant::now();
		let result = run_tool("sleep", &["5"], Duration::from_millis(200)).await;
		assert!(matches!(result, Err(EngineError::Timeout(_))));
		assert!(started.elapsed() < Duration::from_secs(2));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_run_tool_captures_output() {
		let out = run_tool("sh", &["-c", "echo hi; echo oops >&2; exit 3"], Duration::from_secs(5))
			.await
			.unwrap();
		assert_eq!(out.code, Some(3));
		assert_eq!(out.stdout.trim(), "hi");
		assert_eq!(out.stderr.trim(), "oops");
	}
}
