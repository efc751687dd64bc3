//! Process termination primitives used by the stop escalation.

use async_trait::async_trait;
use std::time::Duration;

use crate::control::run_tool;
use crate::error::EngineResult;

/// The three escalation stages of a stop. Swappable so tests can stand in a
/// process that refuses to die.
#[async_trait]
pub trait Terminator: Send + Sync {
	/// Ask the whole tree rooted at `pid` to go away.
	async fn kill_tree(&self, pid: u32) -> EngineResult<()>;

	/// Kill every process in the tree rooted at `pid`, without asking.
	async fn force_tree(&self, pid: u32) -> EngineResult<()> {
		self.kill_tree(pid).await
	}

	/// Whether anything in the tree rooted at `pid` is still running. When
	/// this cannot be observed the root's exit decides, so the default is
	/// `false`.
	async fn tree_alive(&self, _pid: u32) -> bool {
		false
	}

	/// Forcefully kill only the root process.
	async fn kill_root(&self, pid: u32) -> EngineResult<()>;

	/// Kill stray processes named `image` left behind by the tree rooted at
	/// `pid`. Returns whether anything was killed.
	async fn sweep(&self, image: &str, pid: u32) -> EngineResult<bool>;
}

pub struct SystemTerminator {
	tool_timeout: Duration,
}

impl SystemTerminator {
	pub fn new(tool_timeout: Duration) -> Self {
		Self { tool_timeout }
	}
}

impl Default for SystemTerminator {
	fn default() -> Self {
		Self::new(Duration::from_secs(5))
	}
}

#[cfg(unix)]
#[async_trait]
impl Terminator for SystemTerminator {
	async fn kill_tree(&self, pid: u32) -> EngineResult<()> {
		// Children are spawned as process group leaders, so the group id is the pid.
		signal_group(pid, nix::sys::signal::Signal::SIGTERM)
	}

	async fn force_tree(&self, pid: u32) -> EngineResult<()> {
		signal_group(pid, nix::sys::signal::Signal::SIGKILL)
	}

	async fn tree_alive(&self, pid: u32) -> bool {
		group_alive(pid)
	}

	async fn kill_root(&self, pid: u32) -> EngineResult<()> {
		use nix::sys::signal::{kill, Signal};
		use nix::unistd::Pid;
		match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
			Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
			Err(e) => Err(crate::EngineError::ControlFailure(format!("kill {}: {}", pid, e))),
		}
	}

	async fn sweep(&self, image: &str, pid: u32) -> EngineResult<bool> {
		// Scoped to the app's process group, not every `image` on the host.
		let pgid = pid.to_string();
		let out = run_tool("pkill", &["-KILL", "-g", &pgid, "-x", image], self.tool_timeout).await?;
		match out.code {
			Some(0) => Ok(true),
			Some(1) => Ok(false),
			_ => out.check("pkill").map(|_| false),
		}
	}
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> EngineResult<()> {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	match killpg(Pid::from_raw(pgid as i32), signal) {
		Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
		Err(e) => Err(crate::EngineError::ControlFailure(format!(
			"signal {:?} to group {}: {}",
			signal, pgid, e
		))),
	}
}

/// A group is gone once `killpg` reports ESRCH, or once only zombies are
/// left in it.
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	match killpg(Pid::from_raw(pgid as i32), None) {
		Err(nix::errno::Errno::ESRCH) => false,
		Ok(()) => !only_zombies(pgid),
		Err(_) => true,
	}
}

#[cfg(target_os = "linux")]
fn only_zombies(pgid: u32) -> bool {
	let Ok(entries) = std::fs::read_dir("/proc") else {
		return false;
	};
	for entry in entries.flatten() {
		let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
			continue;
		};
		let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
			continue;
		};
		// After the parenthesised command name: state, ppid, pgrp.
		let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
			continue;
		};
		let mut fields = rest.split_whitespace();
		let state = fields.next();
		let pgrp = fields.nth(1).and_then(|p| p.parse::<u32>().ok());
		if pgrp == Some(pgid) && !matches!(state, Some("Z") | Some("X")) {
			return false;
		}
	}
	true
}

#[cfg(all(unix, not(target_os = "linux")))]
fn only_zombies(_pgid: u32) -> bool {
	false
}

#[cfg(windows)]
#[async_trait]
impl Terminator for SystemTerminator {
	async fn kill_tree(&self, pid: u32) -> EngineResult<()> {
		let pid = pid.to_string();
		run_tool("taskkill", &["/F", "/T", "/PID", &pid], self.tool_timeout)
			.await?
			.check("taskkill /T")
			.map(|_| ())
	}

	async fn kill_root(&self, pid: u32) -> EngineResult<()> {
		let pid = pid.to_string();
		run_tool("taskkill", &["/F", "/PID", &pid], self.tool_timeout)
			.await?
			.check("taskkill")
			.map(|_| ())
	}

	async fn sweep(&self, image: &str, _pid: u32) -> EngineResult<bool> {
		// No ancestry filter on Windows: every `image`.exe for this user goes.
		let image = format!("{}.exe", image);
		let out = run_tool("taskkill", &["/F", "/IM", &image], self.tool_timeout).await?;
		Ok(out.success())
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use std::process::Stdio;

	#[tokio::test]
	async fn test_kill_tree_terminates_group() {
		let mut child = tokio::process::Command::new("sh")
			.args(["-c", "sleep 30 & sleep 30; wait"])
			.stdout(Stdio::null())
			.process_group(0)
			.kill_on_drop(true)
			.spawn()
			.unwrap();
		let pid = child.id().unwrap();

		let term = SystemTerminator::default();
		term.kill_tree(pid).await.unwrap();

		let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
			.await
			.expect("group should exit after SIGTERM")
			.unwrap();
		assert!(!status.success());
	}

	#[tokio::test]
	async fn test_force_tree_kills_members_ignoring_sigterm() {
		let mut child = tokio::process::Command::new("sh")
			.args(["-c", "sh -c 'trap \"\" TERM; exec sleep 30' & wait"])
			.stdout(Stdio::null())
			.process_group(0)
			.kill_on_drop(true)
			.spawn()
			.unwrap();
		let pid = child.id().unwrap();
		tokio::time::sleep(Duration::from_millis(300)).await;

		let term = SystemTerminator::default();
		term.kill_tree(pid).await.unwrap();
		let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(term.tree_alive(pid).await, "the trapped sleep should outlive SIGTERM");

		term.force_tree(pid).await.unwrap();
		let mut gone = false;
		for _ in 0..50 {
			if !term.tree_alive(pid).await {
				gone = true;
				break;
			}
			tokio::time::sleep(Duration::from_millis(100)).await;
		}
		assert!(gone);
	}

	#[tokio::test]
	async fn test_kill_missing_process_is_ok() {
		let term = SystemTerminator::default();
		// Far above any pid_max.
		assert!(term.kill_root(2_000_000_000).await.is_ok());
		assert!(term.kill_tree(2_000_000_000).await.is_ok());
		assert!(term.force_tree(2_000_000_000).await.is_ok());
		assert!(!term.tree_alive(2_000_000_000).await);
	}
}
