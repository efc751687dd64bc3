use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::events::SupervisorEvent;

/// Buffer limit; reaching past it drops all but the newest `RETAIN_LINES`.
pub const MAX_LINES: usize = 1000;
pub const RETAIN_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
	Info,
	Error,
}

impl Level {
	pub fn as_str(&self) -> &'static str {
		match self {
			Level::Info => "INFO",
			Level::Error => "ERROR",
		}
	}
}

pub fn format_line(level: Level, message: &str) -> String {
	let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
	format!("[{}] [{}] {}", timestamp, level.as_str(), message)
}

/// Per-application output: an in-memory line buffer, a size-rotated log file,
/// and fan-out to event subscribers. Appending, file writes and the event send
/// happen under one lock, so subscribers see an app's lines in append order.
#[derive(Clone)]
pub struct LogBuffer {
	app_id: Arc<str>,
	inner: Arc<Mutex<Inner>>,
	events: broadcast::Sender<SupervisorEvent>,
}

struct Inner {
	lines: VecDeque<String>,
	writer: LogWriter,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
	max_size: u64,
}

impl LogBuffer {
	pub fn new(
		app_id: &str,
		log_path: &Path,
		max_log_size: u64,
		events: broadcast::Sender<SupervisorEvent>,
	) -> Self {
		Self {
			app_id: Arc::from(app_id),
			inner: Arc::new(Mutex::new(Inner {
				lines: VecDeque::with_capacity(RETAIN_LINES),
				writer: LogWriter::open(log_path, max_log_size),
			})),
			events,
		}
	}

	pub async fn info(&self, message: &str) {
		self.write(Level::Info, message).await;
	}

	pub async fn error(&self, message: &str) {
		self.write(Level::Error, message).await;
	}

	pub async fn write(&self, level: Level, message: &str) {
		let line = format_line(level, message);
		let mut inner = self.inner.lock().await;

		inner.lines.push_back(line.clone());
		if inner.lines.len() > MAX_LINES {
			let excess = inner.lines.len() - RETAIN_LINES;
			inner.lines.drain(..excess);
		}
		inner.writer.write_line(&line);

		let _ = self.events.send(SupervisorEvent::LogReceived {
			id: self.app_id.to_string(),
			line,
			is_error: level == Level::Error,
		});
	}

	/// Points subsequent file writes at a new path (the descriptor was renamed).
	pub async fn retarget(&self, log_path: &Path) {
		let mut inner = self.inner.lock().await;
		if inner.writer.path != log_path {
			let max_size = inner.writer.max_size;
			inner.writer = LogWriter::open(log_path, max_size);
		}
	}

	pub async fn snapshot(&self) -> String {
		let inner = self.inner.lock().await;
		let mut text = String::new();
		for line in &inner.lines {
			text.push_str(line);
			text.push('\n');
		}
		text
	}

	pub async fn lines(&self) -> Vec<String> {
		self.inner.lock().await.lines.iter().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.inner.lock().await.lines.len()
	}

	pub async fn clear(&self) {
		self.inner.lock().await.lines.clear();
	}
}

impl LogWriter {
	fn open(path: &Path, max_size: u64) -> Self {
		if let Some(dir) = path.parent() {
			let _ = fs::create_dir_all(dir);
		}

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(|e| tracing::warn!("cannot open log file {}: {}", path.display(), e))
			.ok();

		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);

		Self {
			file,
			path: path.to_path_buf(),
			bytes_written,
			max_size,
		}
	}

	fn write_line(&mut self, line: &str) {
		if let Some(ref mut file) = self.file {
			let _ = file.write_all(line.as_bytes());
			let _ = file.write_all(b"\n");

			self.bytes_written += line.len() as u64 + 1;

			if self.max_size > 0 && self.bytes_written >= self.max_size {
				self.rotate();
			}
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		let rotated = rotated_path(&self.path);
		let _ = fs::rename(&self.path, &rotated);

		self.file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.ok();
		self.bytes_written = 0;
	}
}

fn rotated_path(path: &Path) -> PathBuf {
	let stem = path
		.file_stem()
		.map(|s| s.to_string_lossy().to_string())
		.unwrap_or_else(|| "app".to_string());
	let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
	let dir = path.parent().unwrap_or_else(|| Path::new("."));
	let candidate = dir.join(format!("{} {}.log", stem, stamp));
	if candidate.exists() {
		dir.join(format!("{} {}.{}.log", stem, stamp, std::process::id()))
	} else {
		candidate
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn buffer(dir: &Path, max_size: u64) -> (LogBuffer, broadcast::Receiver<SupervisorEvent>) {
		let (tx, rx) = broadcast::channel(4096);
		(LogBuffer::new("app-1", &dir.join("app.log"), max_size, tx), rx)
	}

	#[test]
	fn test_format_line() {
		let line = format_line(Level::Error, "boom");
		assert!(line.starts_with('['));
		assert!(line.ends_with("] [ERROR] boom"));
		// [YYYY-mm-dd HH:MM:SS]
		assert_eq!(line.find(']'), Some(20));
	}

	#[tokio::test]
	async fn test_buffer_is_capped() {
		let dir = tempfile::tempdir().unwrap();
		let (buf, _rx) = buffer(dir.path(), 0);

		for i in 0..MAX_LINES {
			buf.info(&format!("line {}", i)).await;
		}
		assert_eq!(buf.len().await, MAX_LINES);

		buf.info("overflow").await;
		let lines = buf.lines().await;
		assert_eq!(lines.len(), RETAIN_LINES);
		assert!(lines.last().unwrap().ends_with("overflow"));
		assert!(lines[0].ends_with(&format!("line {}", MAX_LINES + 1 - RETAIN_LINES)));

		for i in 0..5_000 {
			buf.info(&format!("more {}", i)).await;
			assert!(buf.len().await <= MAX_LINES);
		}
	}

	#[tokio::test]
	async fn test_events_in_order() {
		let dir = tempfile::tempdir().unwrap();
		let (buf, mut rx) = buffer(dir.path(), 0);

		buf.info("one").await;
		buf.error("two").await;

		match rx.recv().await.unwrap() {
			SupervisorEvent::LogReceived { id, line, is_error } => {
				assert_eq!(id, "app-1");
				assert!(line.ends_with("[INFO] one"));
				assert!(!is_error);
			}
			other => panic!("unexpected event {:?}", other),
		}
		match rx.recv().await.unwrap() {
			SupervisorEvent::LogReceived { line, is_error, .. } => {
				assert!(line.ends_with("[ERROR] two"));
				assert!(is_error);
			}
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_clear_and_file_output() {
		let dir = tempfile::tempdir().unwrap();
		let (buf, _rx) = buffer(dir.path(), 0);

		buf.info("persisted").await;
		buf.clear().await;
		assert_eq!(buf.snapshot().await, "");

		let on_disk = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
		assert!(on_disk.contains("[INFO] persisted"));
	}

	#[tokio::test]
	async fn test_rotation() {
		let dir = tempfile::tempdir().unwrap();
		let (buf, _rx) = buffer(dir.path(), 64);

		for i in 0..10 {
			buf.info(&format!("rotating line {}", i)).await;
		}

		let files = std::fs::read_dir(dir.path()).unwrap().count();
		assert!(files >= 2, "expected a rotated file next to app.log");
	}
}
