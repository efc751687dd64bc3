use std::path::PathBuf;

pub const APP_NAME: &str = "alwaysdown";

#[derive(Debug, Clone)]
pub struct EnginePaths {
	pub app_name: String,
}

impl Default for EnginePaths {
	fn default() -> Self {
		Self::new(APP_NAME)
	}
}

impl EnginePaths {
	pub fn new(app_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
		}
	}

	pub fn state_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(dir) = std::env::var_os("LOCALAPPDATA") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".local").join("state").join(&self.app_name)
		} else {
			std::env::temp_dir().join(&self.app_name)
		}
	}

	pub fn config_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(dir) = std::env::var_os("APPDATA") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".config").join(&self.app_name)
		} else {
			std::env::temp_dir().join(&self.app_name).join("config")
		}
	}

	pub fn log_dir(&self) -> PathBuf {
		self.state_dir().join("logs")
	}

	/// Generated service launcher scripts.
	pub fn services_dir(&self) -> PathBuf {
		self.state_dir().join("services")
	}

	/// Generated login-time launcher scripts.
	pub fn startup_dir(&self) -> PathBuf {
		self.state_dir().join("startup")
	}
}

pub fn home_dir() -> Option<PathBuf> {
	std::env::var_os("HOME")
		.or_else(|| std::env::var_os("USERPROFILE"))
		.map(PathBuf::from)
}

pub fn expand_tilde(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = home_dir() {
			return home.join(rest);
		}
	}
	PathBuf::from(path)
}
