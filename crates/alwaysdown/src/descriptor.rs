use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::identifier::derive_service_identifier;

fn default_start_command() -> String { "npm run start".to_string() }
fn default_port() -> u16 { 3000 }
fn new_id() -> String { uuid::Uuid::new_v4().to_string() }

/// One managed application: what to run, where, and how it is identified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
	#[serde(default = "new_id")]
	id: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub project_path: String,
	#[serde(default)]
	pub working_directory: String,
	#[serde(default = "default_start_command")]
	pub start_command: String,
	#[serde(default)]
	pub environment_variables: HashMap<String, String>,
	#[serde(default)]
	pub auto_start: bool,
	#[serde(default = "default_port")]
	pub port: u16,

	// Observed by the supervisor; informational only.
	#[serde(default)]
	pub is_running: bool,
	#[serde(default)]
	pub process_id: Option<u32>,
	#[serde(default)]
	pub last_started: Option<DateTime<Local>>,
	#[serde(default)]
	pub last_stopped: Option<DateTime<Local>>,
}

impl Default for ApplicationDescriptor {
	fn default() -> Self {
		Self::with_id(new_id())
	}
}

impl ApplicationDescriptor {
	pub fn new(name: impl Into<String>, project_path: impl Into<String>, start_command: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			project_path: project_path.into(),
			start_command: start_command.into(),
			..Self::default()
		}
	}

	fn with_id(id: String) -> Self {
		Self {
			id,
			name: String::new(),
			description: String::new(),
			project_path: String::new(),
			working_directory: String::new(),
			start_command: default_start_command(),
			environment_variables: HashMap::new(),
			auto_start: false,
			port: default_port(),
			is_running: false,
			process_id: None,
			last_started: None,
			last_stopped: None,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Recomputed from `name`/`project_path` on every call, so it can never go
	/// stale. After a rename, pass the previous value to
	/// [`ServiceRegistrar::migrate`](crate::ServiceRegistrar::migrate).
	pub fn service_identifier(&self) -> String {
		derive_service_identifier(&self.name, &self.project_path)
	}

	pub fn effective_working_directory(&self) -> PathBuf {
		if self.working_directory.trim().is_empty() {
			PathBuf::from(&self.project_path)
		} else {
			PathBuf::from(&self.working_directory)
		}
	}

	pub fn log_file_path(&self, log_dir: &Path) -> PathBuf {
		log_dir.join(format!("{}.log", self.service_identifier()))
	}

	pub fn service_log_path(&self, log_dir: &Path) -> PathBuf {
		log_dir.join(format!("{}_service.log", self.service_identifier()))
	}

	pub fn display_name(&self) -> String {
		if !self.name.is_empty() {
			return self.name.clone();
		}
		let trimmed = self.project_path.trim_end_matches(['/', '\\']);
		trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).to_string()
	}

	pub fn status_text(&self) -> String {
		match (self.is_running, self.process_id) {
			(true, Some(pid)) => format!("Running (PID: {})", pid),
			_ => "Stopped".to_string(),
		}
	}

	/// Key of the per-user startup entry; tied to `id`, so renames keep it.
	pub fn startup_key(&self) -> String {
		format!("AlwaysDownApp_{}", self.id.replace('-', ""))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new_descriptor_has_unique_id() {
		let a = ApplicationDescriptor::new("Api", "/srv/api", "node server.js");
		let b = ApplicationDescriptor::new("Api", "/srv/api", "node server.js");
		assert_ne!(a.id(), b.id());
		assert_eq!(a.service_identifier(), b.service_identifier());
	}

	#[test]
	fn test_identifier_follows_rename() {
		let mut app = ApplicationDescriptor::new("Foo", "/srv/foo", "npm run start");
		assert_eq!(app.service_identifier(), "AlwaysDown_Foo");
		app.name = "Foo!! Bar".into();
		assert_eq!(app.service_identifier(), "AlwaysDown_Foo_Bar");
		app.name.clear();
		assert_eq!(app.service_identifier(), "AlwaysDown_foo");
	}

	#[test]
	fn test_working_directory_defaults_to_project_path() {
		let mut app = ApplicationDescriptor::new("Api", "/srv/api", "node server.js");
		assert_eq!(app.effective_working_directory(), PathBuf::from("/srv/api"));
		app.working_directory = "/srv/api/dist".into();
		assert_eq!(app.effective_working_directory(), PathBuf::from("/srv/api/dist"));
	}

	#[test]
	fn test_derived_paths_and_keys() {
		let app = ApplicationDescriptor::new("Api", "/srv/api", "node server.js");
		let logs = Path::new("/var/log/alwaysdown");
		assert_eq!(app.log_file_path(logs), logs.join("AlwaysDown_Api.log"));
		assert_eq!(app.service_log_path(logs), logs.join("AlwaysDown_Api_service.log"));
		assert!(app.startup_key().starts_with("AlwaysDownApp_"));
		assert!(!app.startup_key().contains('-'));
	}

	#[test]
	fn test_display_and_status() {
		let mut app = ApplicationDescriptor::new("", "/srv/shop", "npm start");
		assert_eq!(app.display_name(), "shop");
		assert_eq!(app.status_text(), "Stopped");
		app.is_running = true;
		app.process_id = Some(42);
		assert_eq!(app.status_text(), "Running (PID: 42)");
	}

	#[test]
	fn test_serde_defaults() {
		let app: ApplicationDescriptor =
			serde_json::from_str(r#"{"id":"abc","name":"Api","projectPath":"/srv/api"}"#).unwrap();
		assert_eq!(app.id(), "abc");
		assert_eq!(app.start_command, "npm run start");
		assert_eq!(app.port, 3000);
		assert!(!app.is_running);
	}
}
