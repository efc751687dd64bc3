//! Generated shell/batch scripts: the program a registered service runs, and
//! the per-user login launcher used for autostart.

use std::path::Path;

use crate::descriptor::ApplicationDescriptor;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
	Sh,
	Bat,
}

impl ScriptKind {
	pub fn native() -> Self {
		if cfg!(windows) {
			ScriptKind::Bat
		} else {
			ScriptKind::Sh
		}
	}

	pub fn extension(&self) -> &'static str {
		match self {
			ScriptKind::Sh => "sh",
			ScriptKind::Bat => "bat",
		}
	}
}

/// Script a registered service executes. It appends its own progress and the
/// command's output to `service_log`, and exits with the command's code so the
/// service manager's failure handling sees crashes.
pub fn service_script(app: &ApplicationDescriptor, kind: ScriptKind, service_log: &Path) -> String {
	match kind {
		ScriptKind::Sh => service_sh(app, service_log),
		ScriptKind::Bat => service_bat(app, service_log),
	}
}

/// Script run at user login: change into the working directory and launch the
/// start command detached.
pub fn startup_script(app: &ApplicationDescriptor, kind: ScriptKind, log_file: &Path) -> String {
	match kind {
		ScriptKind::Sh => startup_sh(app, log_file),
		ScriptKind::Bat => startup_bat(app),
	}
}

pub fn write_script(path: &Path, contents: &str) -> EngineResult<()> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir).map_err(|e| EngineError::from_io("create script dir", e))?;
	}
	std::fs::write(path, contents).map_err(|e| EngineError::from_io("write script", e))?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
			.map_err(|e| EngineError::from_io("chmod script", e))?;
	}

	Ok(())
}

/// Environment the service runs with: `NODE_ENV=production` unless the
/// descriptor sets it, then the descriptor's variables in name order.
fn service_env(app: &ApplicationDescriptor) -> Vec<(String, String)> {
	let mut env: Vec<(String, String)> = app
		.environment_variables
		.iter()
		.filter(|(k, _)| valid_env_name(k))
		.map(|(k, v)| (k.clone(), v.clone()))
		.collect();
	env.sort();
	if !app.environment_variables.contains_key("NODE_ENV") {
		env.insert(0, ("NODE_ENV".to_string(), "production".to_string()));
	}
	env
}

fn descriptor_env(app: &ApplicationDescriptor) -> Vec<(String, String)> {
	let mut env: Vec<(String, String)> = app
		.environment_variables
		.iter()
		.filter(|(k, _)| valid_env_name(k))
		.map(|(k, v)| (k.clone(), v.clone()))
		.collect();
	env.sort();
	env
}

fn valid_env_name(name: &str) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
		_ => return false,
	}
	chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── sh ──────────────────────────────────────────────────────────────────────

fn sh_quote(s: &str) -> String {
	format!("'{}'", s.replace('\'', r"'\''"))
}

fn service_sh(app: &ApplicationDescriptor, service_log: &Path) -> String {
	let display = app.display_name();
	let project = app.project_path.as_str();
	let workdir = app.effective_working_directory();

	let mut s = String::new();
	s.push_str("#!/bin/sh\n");
	s.push_str(&format!("# AlwaysDown service launcher for {}\n", display.replace('\n', " ")));
	s.push_str(&format!("LOG={}\n", sh_quote(&service_log.to_string_lossy())));
	s.push_str("log() { printf '[%s] %s\\n' \"$(date '+%Y-%m-%d %H:%M:%S')\" \"$1\" >> \"$LOG\"; }\n\n");
	s.push_str(&format!("log {}\n", sh_quote(&format!("Starting service for {}", display))));
	s.push_str(&format!("if [ ! -d {} ]; then\n", sh_quote(project)));
	s.push_str(&format!(
		"\tlog {}\n",
		sh_quote(&format!("ERROR: Project directory not found: {}", project))
	));
	s.push_str("\texit 1\nfi\n");
	s.push_str(&format!("cd {} || exit 1\n\n", sh_quote(&workdir.to_string_lossy())));
	for (key, value) in service_env(app) {
		s.push_str(&format!("export {}={}\n", key, sh_quote(&value)));
	}
	s.push('\n');
	s.push_str(&format!("log {}\n", sh_quote(&format!("Running: {}", app.start_command))));
	s.push_str(&format!("(\n{}\n) >> \"$LOG\" 2>&1\n", app.start_command));
	s.push_str("CODE=$?\n");
	s.push_str("log \"Application exited with code: $CODE\"\n");
	s.push_str("exit $CODE\n");
	s
}

fn startup_sh(app: &ApplicationDescriptor, log_file: &Path) -> String {
	let mut s = String::new();
	s.push_str("#!/bin/sh\n");
	s.push_str(&format!(
		"cd {} || exit 1\n",
		sh_quote(&app.effective_working_directory().to_string_lossy())
	));
	for (key, value) in descriptor_env(app) {
		s.push_str(&format!("export {}={}\n", key, sh_quote(&value)));
	}
	s.push_str(&format!(
		"nohup sh -c {} >> {} 2>&1 &\n",
		sh_quote(&app.start_command),
		sh_quote(&log_file.to_string_lossy())
	));
	s
}

// ── bat ─────────────────────────────────────────────────────────────────────

/// Escapes text for an `echo` line: `%` doubles, metacharacters get `^`.
fn bat_echo(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'%' => out.push_str("%%"),
			'^' | '&' | '|' | '<' | '>' | '(' | ')' => {
				out.push('^');
				out.push(c);
			}
			'\r' | '\n' => out.push(' '),
			_ => out.push(c),
		}
	}
	out
}

fn bat_set(key: &str, value: &str) -> String {
	format!("set \"{}={}\"\r\n", key, value.replace('%', "%%").replace('"', ""))
}

fn service_bat(app: &ApplicationDescriptor, service_log: &Path) -> String {
	let display = app.display_name();
	let project = app.project_path.as_str();
	let workdir = app.effective_working_directory();
	let stamp = "[%date% %time%]";

	let mut s = String::new();
	s.push_str("@echo off\r\n");
	s.push_str(&format!("rem AlwaysDown service launcher for {}\r\n", bat_echo(&display)));
	s.push_str(&bat_set("LOG", &service_log.to_string_lossy()));
	s.push_str(&format!(
		"echo {} Starting service for {} >> \"%LOG%\"\r\n",
		stamp,
		bat_echo(&display)
	));
	s.push_str(&format!("if not exist \"{}\" (\r\n", project));
	s.push_str(&format!(
		"\techo {} ERROR: Project directory not found: {} >> \"%LOG%\"\r\n",
		stamp,
		bat_echo(project)
	));
	s.push_str("\texit /b 1\r\n)\r\n");
	s.push_str(&format!("cd /d \"{}\"\r\n", workdir.to_string_lossy()));
	for (key, value) in service_env(app) {
		s.push_str(&bat_set(&key, &value));
	}
	s.push_str(&format!(
		"echo {} Running: {} >> \"%LOG%\"\r\n",
		stamp,
		bat_echo(&app.start_command)
	));
	s.push_str(&format!("call {} >> \"%LOG%\" 2>&1\r\n", app.start_command));
	s.push_str("set CODE=%ERRORLEVEL%\r\n");
	s.push_str(&format!(
		"echo {} Application exited with code: %CODE% >> \"%LOG%\"\r\n",
		stamp
	));
	s.push_str("exit /b %CODE%\r\n");
	s
}

fn startup_bat(app: &ApplicationDescriptor) -> String {
	let mut s = String::new();
	s.push_str("@echo off\r\n");
	s.push_str(&format!(
		"cd /d \"{}\"\r\n",
		app.effective_working_directory().to_string_lossy()
	));
	for (key, value) in descriptor_env(app) {
		s.push_str(&bat_set(&key, &value));
	}
	s.push_str(&format!("start \"\" cmd /c {}\r\n", app.start_command));
	s
}
