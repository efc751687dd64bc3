use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

use crate::command::{sweep_image, LaunchPlan};
use crate::config::EngineConfig;
use crate::descriptor::ApplicationDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::events::SupervisorEvent;
use crate::output::{Level, LogBuffer};
use crate::paths::EnginePaths;
use crate::terminate::{SystemTerminator, Terminator};

const EVENT_CAPACITY: usize = 1024;
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);
const TREE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	pub log_dir: PathBuf,
	pub max_log_size: u64,
	/// Wait for the tree to exit after the tree kill.
	pub tree_kill_timeout: Duration,
	/// Wait for the root to exit after the direct kill.
	pub kill_grace_period: Duration,
	/// Bound on the whole stop sequence.
	pub stop_timeout: Duration,
	/// Pause between stop and start on restart.
	pub restart_delay: Duration,
}

impl SupervisorConfig {
	pub fn new(log_dir: impl Into<PathBuf>) -> Self {
		let timeouts = crate::config::SupervisorTimeouts::default();
		Self {
			log_dir: log_dir.into(),
			max_log_size: 10 * 1024 * 1024,
			tree_kill_timeout: timeouts.tree_kill(),
			kill_grace_period: timeouts.kill_grace(),
			stop_timeout: timeouts.stop_timeout(),
			restart_delay: timeouts.restart_delay(),
		}
	}

	pub fn from_engine(config: &EngineConfig, paths: &EnginePaths) -> Self {
		Self {
			log_dir: config.log_dir(paths),
			max_log_size: config.logs.max_size_bytes,
			tree_kill_timeout: config.supervisor.tree_kill(),
			kill_grace_period: config.supervisor.kill_grace(),
			stop_timeout: config.supervisor.stop_timeout(),
			restart_delay: config.supervisor.restart_delay(),
		}
	}
}

/// Owns at most one child process per application id, captures its output,
/// and stops it with an escalating kill sequence.
pub struct Supervisor {
	processes: RwLock<HashMap<String, TrackedProcess>>,
	logs: RwLock<HashMap<String, LogBuffer>>,
	events: broadcast::Sender<SupervisorEvent>,
	terminator: Arc<dyn Terminator>,
	generation: AtomicU64,
	pub config: SupervisorConfig,
}

struct TrackedProcess {
	pid: u32,
	generation: u64,
	sweep_image: Option<&'static str>,
	exited: watch::Receiver<Option<i32>>,
	monitor: JoinHandle<()>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		let tool_timeout = config.tree_kill_timeout;
		Self::with_terminator(config, Arc::new(SystemTerminator::new(tool_timeout)))
	}

	pub fn with_terminator(config: SupervisorConfig, terminator: Arc<dyn Terminator>) -> Arc<Self> {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Arc::new(Self {
			processes: RwLock::new(HashMap::new()),
			logs: RwLock::new(HashMap::new()),
			events,
			terminator,
			generation: AtomicU64::new(1),
			config,
		})
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
		self.events.subscribe()
	}

	// --- Start ---

	/// Starts the application, stopping a previously tracked process for the
	/// same id first. Returns the new pid.
	pub async fn start_application(
		self: &Arc<Self>,
		app: &mut ApplicationDescriptor,
	) -> EngineResult<u32> {
		let log = self.log_buffer(app).await;
		match self.spawn_tracked(app, &log).await {
			Ok(pid) => Ok(pid),
			Err(e) => {
				log.error(&format!("Failed to start application: {}", e)).await;
				Err(e)
			}
		}
	}

	async fn spawn_tracked(
		self: &Arc<Self>,
		app: &mut ApplicationDescriptor,
		log: &LogBuffer,
	) -> EngineResult<u32> {
		if self.is_tracked(app.id()).await {
			if let Err(e) = self.stop_application(app).await {
				tracing::warn!("{}: stop before start failed: {}", app.id(), e);
			}
		}

		if !Path::new(&app.project_path).is_dir() {
			return Err(EngineError::NotFound(format!(
				"Project path not found: {}",
				app.project_path
			)));
		}

		std::fs::create_dir_all(&self.config.log_dir)?;

		// Each run starts with a fresh buffer; the log file keeps history.
		log.clear().await;
		let plan = LaunchPlan::parse(&app.start_command);
		log.info(&plan.describe()).await;

		let mut child = plan
			.to_command(app)
			.spawn()
			.map_err(|e| EngineError::SpawnFailure(e.to_string()))?;
		let pid = child
			.id()
			.ok_or_else(|| EngineError::SpawnFailure("process exited before reporting a pid".into()))?;

		let mut readers = Vec::new();
		if let Some(stdout) = child.stdout.take() {
			readers.push(tokio::spawn(pipe_lines(stdout, log.clone(), Level::Info)));
		}
		if let Some(stderr) = child.stderr.take() {
			readers.push(tokio::spawn(pipe_lines(stderr, log.clone(), Level::Error)));
		}

		let id = app.id().to_string();
		let generation = self.generation.fetch_add(1, Ordering::SeqCst);
		let (exit_tx, exit_rx) = watch::channel(None);

		// The map stays locked until the start is announced, so a process that
		// dies instantly still reports "started" before "exited".
		let mut processes = self.processes.write().await;

		let sup = Arc::clone(self);
		let monitor_id = id.clone();
		let monitor = tokio::spawn(async move {
			let code = match child.wait().await {
				Ok(status) => status.code().unwrap_or(-1),
				Err(e) => {
					tracing::warn!("{}: wait failed: {}", monitor_id, e);
					-1
				}
			};
			let _ = exit_tx.send(Some(code));
			// Let trailing output land before the exit line.
			for reader in readers {
				let _ = tokio::time::timeout(OUTPUT_DRAIN, reader).await;
			}
			sup.on_exit(&monitor_id, generation, code).await;
		});

		processes.insert(
			id.clone(),
			TrackedProcess {
				pid,
				generation,
				sweep_image: sweep_image(&app.start_command),
				exited: exit_rx,
				monitor,
			},
		);

		app.is_running = true;
		app.process_id = Some(pid);
		app.last_started = Some(chrono::Local::now());

		let _ = self.events.send(SupervisorEvent::StatusChanged {
			id: id.clone(),
			is_running: true,
			process_id: Some(pid),
		});
		log.info(&format!("Application started successfully. PID: {}", pid)).await;
		drop(processes);

		tracing::info!("{}: started {} (pid {})", id, app.display_name(), pid);
		Ok(pid)
	}

	// --- Stop ---

	/// Stops the tracked process: tree kill (terminate, then force once
	/// `tree_kill_timeout` passes with group members left), then direct kill,
	/// then a sweep for stray interpreter processes, all bounded by
	/// `stop_timeout`. On timeout the
	/// handle is released anyway and `Timeout` is returned; the process may
	/// still be alive.
	pub async fn stop_application(
		self: &Arc<Self>,
		app: &mut ApplicationDescriptor,
	) -> EngineResult<()> {
		let id = app.id().to_string();
		let tracked = self.processes.write().await.remove(&id);

		let Some(tracked) = tracked else {
			app.is_running = false;
			app.process_id = None;
			return Ok(());
		};

		let log = self.log_buffer(app).await;
		log.info("Stopping application...").await;

		let outcome = tokio::time::timeout(self.config.stop_timeout, self.escalate(&tracked, &log)).await;
		tracked.monitor.abort();

		app.is_running = false;
		app.process_id = None;
		let _ = self.events.send(SupervisorEvent::StatusChanged {
			id: id.clone(),
			is_running: false,
			process_id: None,
		});

		match outcome {
			Ok(()) => {
				app.last_stopped = Some(chrono::Local::now());
				log.info("Application stop process completed.").await;
				tracing::info!("{}: stopped (pid {})", id, tracked.pid);
				Ok(())
			}
			Err(_) => {
				let msg = format!(
					"Stop timed out after {:?}; the application may still be running (PID: {})",
					self.config.stop_timeout, tracked.pid
				);
				log.error(&msg).await;
				tracing::warn!("{}: {}", id, msg);
				Err(EngineError::Timeout(msg))
			}
		}
	}

	async fn escalate(&self, tracked: &TrackedProcess, log: &LogBuffer) {
		let pid = tracked.pid;
		let mut exited = tracked.exited.clone();

		let root_exited = exited.borrow().is_some();
		if root_exited && !self.terminator.tree_alive(pid).await {
			log.info("Process already exited").await;
			return;
		}

		log.info(&format!("Attempting to kill process tree for PID: {}", pid)).await;
		let tree_killed = match self.terminator.kill_tree(pid).await {
			Ok(()) => {
				if self.wait_for_tree(&mut exited, pid, self.config.tree_kill_timeout).await {
					true
				} else {
					log.info("Process tree still alive, forcing kill of the whole tree...").await;
					match self.terminator.force_tree(pid).await {
						Ok(()) => self.wait_for_tree(&mut exited, pid, self.config.kill_grace_period).await,
						Err(e) => {
							log.error(&format!("Forced tree kill failed: {}", e)).await;
							false
						}
					}
				}
			}
			Err(e) => {
				log.error(&format!("Tree kill failed: {}", e)).await;
				false
			}
		};

		if tree_killed {
			log.info("Process tree killed successfully").await;
		} else {
			log.info("Tree kill did not stop the process, trying direct process termination...").await;
			match self.terminator.kill_root(pid).await {
				Ok(()) => {
					if wait_for_exit(&mut exited, self.config.kill_grace_period).await {
						log.info("Process terminated successfully").await;
					} else {
						log.error("Process termination timed out").await;
					}
				}
				Err(e) => log.error(&format!("Direct termination failed: {}", e)).await,
			}
		}

		if let Some(image) = tracked.sweep_image {
			log.info(&format!("Attempting to kill any remaining {} processes...", image)).await;
			match self.terminator.sweep(image, pid).await {
				Ok(true) => log.info(&format!("Killed remaining {} processes", image)).await,
				Ok(false) => tracing::debug!("no stray {} processes for pid {}", image, pid),
				Err(e) => log.error(&format!("Error killing processes by name: {}", e)).await,
			}
		}
	}

	/// True once the root has exited and nothing else in its tree is left.
	async fn wait_for_tree(
		&self,
		exited: &mut watch::Receiver<Option<i32>>,
		pid: u32,
		limit: Duration,
	) -> bool {
		let wait = async {
			if exited.wait_for(|code| code.is_some()).await.is_err() {
				return false;
			}
			while self.terminator.tree_alive(pid).await {
				tokio::time::sleep(TREE_POLL).await;
			}
			true
		};
		matches!(tokio::time::timeout(limit, wait).await, Ok(true))
	}

	// --- Restart ---

	pub async fn restart_application(
		self: &Arc<Self>,
		app: &mut ApplicationDescriptor,
	) -> EngineResult<u32> {
		self.log_buffer(app).await.info("Restarting application...").await;
		if let Err(e) = self.stop_application(app).await {
			tracing::warn!("{}: restart continues after failed stop: {}", app.id(), e);
		}
		tokio::time::sleep(self.config.restart_delay).await;
		self.start_application(app).await
	}

	// --- Queries ---

	/// Liveness according to the tracked handle. An exit that has happened but
	/// not been processed yet is processed here.
	pub async fn is_application_running(&self, id: &str) -> bool {
		let (generation, code) = {
			let processes = self.processes.read().await;
			let Some(tracked) = processes.get(id) else {
				return false;
			};
			let code = *tracked.exited.borrow();
			match code {
				None => return true,
				Some(code) => (tracked.generation, code),
			}
		};
		self.on_exit(id, generation, code).await;
		false
	}

	pub async fn process_id(&self, id: &str) -> Option<u32> {
		self.processes.read().await.get(id).map(|t| t.pid)
	}

	pub async fn tracked_ids(&self) -> Vec<String> {
		self.processes.read().await.keys().cloned().collect()
	}

	pub async fn get_application_logs(&self, id: &str) -> String {
		let buffer = self.logs.read().await.get(id).cloned();
		match buffer {
			Some(buffer) => buffer.snapshot().await,
			None => String::new(),
		}
	}

	pub async fn clear_application_logs(&self, id: &str) {
		let buffer = self.logs.read().await.get(id).cloned();
		if let Some(buffer) = buffer {
			buffer.clear().await;
		}
	}

	// --- Shutdown ---

	/// Kills every tracked process tree outright. No escalation, no waiting
	/// beyond `kill_grace_period` per process.
	pub async fn shutdown(&self) {
		let tracked: Vec<(String, TrackedProcess)> = self.processes.write().await.drain().collect();
		for (id, process) in tracked {
			match tokio::time::timeout(self.config.kill_grace_period, self.terminator.force_tree(process.pid)).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => tracing::warn!("{}: kill on shutdown failed: {}", id, e),
				Err(_) => tracing::warn!("{}: kill on shutdown timed out", id),
			}
			process.monitor.abort();
			let _ = self.events.send(SupervisorEvent::StatusChanged {
				id,
				is_running: false,
				process_id: None,
			});
		}
	}

	// --- Internals ---

	async fn is_tracked(&self, id: &str) -> bool {
		self.processes.read().await.contains_key(id)
	}

	async fn log_buffer(&self, app: &ApplicationDescriptor) -> LogBuffer {
		let path = app.log_file_path(&self.config.log_dir);
		let existing = self.logs.read().await.get(app.id()).cloned();
		if let Some(buffer) = existing {
			buffer.retarget(&path).await;
			return buffer;
		}

		let mut logs = self.logs.write().await;
		logs.entry(app.id().to_string())
			.or_insert_with(|| {
				LogBuffer::new(app.id(), &path, self.config.max_log_size, self.events.clone())
			})
			.clone()
	}

	/// Handles an exit that nobody asked for. Only the caller that removes the
	/// handle reports it, so the exit is announced once.
	async fn on_exit(&self, id: &str, generation: u64, code: i32) {
		let removed = {
			let mut processes = self.processes.write().await;
			if processes.get(id).map(|t| t.generation) == Some(generation) {
				processes.remove(id)
			} else {
				None
			}
		};
		if removed.is_none() {
			return;
		}

		let buffer = self.logs.read().await.get(id).cloned();
		if let Some(buffer) = buffer {
			let level = if code == 0 { Level::Info } else { Level::Error };
			buffer
				.write(level, &format!("Application exited with code: {}", code))
				.await;
		}
		let _ = self.events.send(SupervisorEvent::StatusChanged {
			id: id.to_string(),
			is_running: false,
			process_id: None,
		});
		tracing::info!("{}: exited with code {}", id, code);
	}
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<i32>>, limit: Duration) -> bool {
	tokio::time::timeout(limit, exited.wait_for(|code| code.is_some()))
		.await
		.map(|r| r.is_ok())
		.unwrap_or(false)
}

async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, log: LogBuffer, level: Level) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf);
				let line = line.trim_end_matches(['\r', '\n']);
				if !line.is_empty() {
					log.write(level, line).await;
				}
			}
			Err(_) => break,
		}
	}
}
