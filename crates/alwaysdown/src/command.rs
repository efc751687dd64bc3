use std::process::Stdio;
use tokio::process::Command;

use crate::descriptor::ApplicationDescriptor;

const DIRECT_INTERPRETERS: &[&str] = &["node", "java", "python"];
const EXECUTABLE_SUFFIX: &str = ".exe";

/// How a start command is turned into a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPlan {
	/// Run the program itself; no shell in between.
	Direct { program: String, args: Vec<String> },
	/// Hand the whole string to the platform shell (needed for PATH shims
	/// like `npm`, `yarn`, and anything using shell syntax).
	Shell { command: String },
}

impl LaunchPlan {
	pub fn parse(command: &str) -> Self {
		let parts: Vec<&str> = command.split_whitespace().collect();
		let Some(first) = parts.first() else {
			return LaunchPlan::Shell { command: command.trim().to_string() };
		};

		let lower = first.to_lowercase();
		let base = lower.strip_suffix(EXECUTABLE_SUFFIX).unwrap_or(&lower);
		let program = if DIRECT_INTERPRETERS.contains(&base) {
			base.to_string()
		} else if lower.ends_with(EXECUTABLE_SUFFIX) {
			first.to_string()
		} else {
			return LaunchPlan::Shell { command: command.trim().to_string() };
		};

		LaunchPlan::Direct {
			program,
			args: parts[1..].iter().map(|s| s.to_string()).collect(),
		}
	}

	pub fn is_direct(&self) -> bool {
		matches!(self, LaunchPlan::Direct { .. })
	}

	pub fn describe(&self) -> String {
		match self {
			LaunchPlan::Direct { program, args } if args.is_empty() => {
				format!("Starting directly: {}", program)
			}
			LaunchPlan::Direct { program, args } => {
				format!("Starting directly: {} {}", program, args.join(" "))
			}
			LaunchPlan::Shell { command } => format!("Starting with shell wrapper: {}", command),
		}
	}

	pub fn to_command(&self, app: &ApplicationDescriptor) -> Command {
		let mut cmd = match self {
			LaunchPlan::Direct { program, args } => {
				let mut cmd = Command::new(program);
				cmd.args(args);
				cmd
			}
			LaunchPlan::Shell { command } => shell_command(command),
		};

		cmd.current_dir(app.effective_working_directory())
			.envs(&app.environment_variables)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		#[cfg(unix)]
		cmd.process_group(0);

		cmd
	}
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
	let mut cmd = Command::new("cmd.exe");
	cmd.arg("/c").raw_arg(command);
	cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", command]);
	cmd
}

/// Interpreter image that a start command leaves behind, if any. Package
/// manager wrappers spawn `node` children that can outlive the wrapper.
pub fn sweep_image(command: &str) -> Option<&'static str> {
	let lower = command.to_lowercase();
	let tokens: Vec<&str> = lower.split_whitespace().collect();
	let first = *tokens.first()?;
	let first = first.strip_suffix(EXECUTABLE_SUFFIX).unwrap_or(first);
	let first = first.rsplit(['/', '\\']).next().unwrap_or(first);

	match first {
		"node" | "npm" | "npx" | "yarn" | "pnpm" => Some("node"),
		"java" => Some("java"),
		"python" | "python3" => Some("python"),
		_ if lower.contains("node") => Some("node"),
		_ if lower.contains("java") => Some("java"),
		_ if lower.contains("python") => Some("python"),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_node_is_direct() {
		assert_eq!(
			LaunchPlan::parse("node server.js"),
			LaunchPlan::Direct { program: "node".into(), args: vec!["server.js".into()] }
		);
		assert_eq!(
			LaunchPlan::parse("  Node.exe   --inspect   app.js "),
			LaunchPlan::Direct {
				program: "node".into(),
				args: vec!["--inspect".into(), "app.js".into()],
			}
		);
	}

	#[test]
	fn test_java_python_and_exe_are_direct() {
		assert!(LaunchPlan::parse("java -jar app.jar").is_direct());
		assert!(LaunchPlan::parse("python manage.py runserver").is_direct());
		assert_eq!(
			LaunchPlan::parse("C:\\tools\\Server.EXE --port 80"),
			LaunchPlan::Direct {
				program: "C:\\tools\\Server.EXE".into(),
				args: vec!["--port".into(), "80".into()],
			}
		);
	}

	#[test]
	fn test_package_managers_are_shell_wrapped() {
		assert_eq!(
			LaunchPlan::parse("npm run start"),
			LaunchPlan::Shell { command: "npm run start".into() }
		);
		assert!(!LaunchPlan::parse("yarn dev").is_direct());
		assert!(!LaunchPlan::parse("./run.sh && echo done").is_direct());
		assert!(!LaunchPlan::parse("").is_direct());
	}

	#[test]
	fn test_describe() {
		assert_eq!(LaunchPlan::parse("node server.js").describe(), "Starting directly: node server.js");
		assert_eq!(
			LaunchPlan::parse("npm run start").describe(),
			"Starting with shell wrapper: npm run start"
		);
	}

	#[test]
	fn test_sweep_image() {
		assert_eq!(sweep_image("npm run start"), Some("node"));
		assert_eq!(sweep_image("node server.js"), Some("node"));
		assert_eq!(sweep_image("/usr/bin/java -jar x.jar"), Some("java"));
		assert_eq!(sweep_image("python3 app.py"), Some("python"));
		assert_eq!(sweep_image("sleep 30"), None);
		assert_eq!(sweep_image(""), None);
	}
}
