use alwaysdown::{ApplicationDescriptor, GlobalSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Registered applications (~/.config/alwaysdown/apps.toml) ────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppsFile {
	#[serde(default)]
	pub settings: GlobalSettings,
	#[serde(default, rename = "app")]
	pub apps: Vec<ApplicationDescriptor>,
}

impl AppsFile {
	/// Looks an app up by name (case-insensitive), id, or service identifier.
	pub fn find(&self, query: &str) -> Option<&ApplicationDescriptor> {
		self.position(query).map(|i| &self.apps[i])
	}

	pub fn find_mut(&mut self, query: &str) -> Option<&mut ApplicationDescriptor> {
		self.position(query).map(move |i| &mut self.apps[i])
	}

	pub fn remove(&mut self, query: &str) -> Option<ApplicationDescriptor> {
		self.position(query).map(|i| self.apps.remove(i))
	}

	fn position(&self, query: &str) -> Option<usize> {
		self.apps
			.iter()
			.position(|a| a.name.eq_ignore_ascii_case(query))
			.or_else(|| self.apps.iter().position(|a| a.id() == query))
			.or_else(|| self.apps.iter().position(|a| a.service_identifier() == query))
	}
}

pub fn load_apps(path: &Path) -> AppsFile {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(apps) => return apps,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	AppsFile::default()
}

pub fn save_apps(path: &Path, apps: &AppsFile) -> Result<(), String> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
	}
	let content = toml::to_string_pretty(apps).map_err(|e| format!("serialize apps: {}", e))?;
	std::fs::write(path, content).map_err(|e| format!("{}: {}", path.display(), e))
}
