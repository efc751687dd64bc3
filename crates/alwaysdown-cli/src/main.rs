mod apps;

use std::path::PathBuf;
use std::sync::Arc;

use alwaysdown::{
	load_engine_config, platform_backend, ApplicationDescriptor, EngineConfig, EnginePaths,
	RegistrarConfig, ServiceRegistrar, ServiceState, Supervisor, SupervisorConfig, SupervisorEvent,
};
use apps::{load_apps, save_apps, AppsFile};
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

struct Ctx {
	paths: EnginePaths,
	config: EngineConfig,
	apps_path: PathBuf,
}

impl Ctx {
	fn load() -> Self {
		let paths = EnginePaths::default();
		let config = load_engine_config(&paths);
		let apps_path = paths.config_dir().join("apps.toml");
		Self { paths, config, apps_path }
	}

	fn apps(&self) -> AppsFile {
		load_apps(&self.apps_path)
	}

	fn save(&self, apps: &AppsFile) {
		if let Err(e) = save_apps(&self.apps_path, apps) {
			fail(&e);
		}
	}

	fn registrar(&self) -> ServiceRegistrar {
		ServiceRegistrar::new(
			platform_backend(&self.config),
			RegistrarConfig::from_engine(&self.config, &self.paths),
		)
	}

	fn supervisor(&self) -> Arc<Supervisor> {
		Supervisor::new(SupervisorConfig::from_engine(&self.config, &self.paths))
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_env("ALWAYSDOWN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
		)
		.with_writer(std::io::stderr)
		.init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	let ctx = Ctx::load();

	if args.is_empty() {
		cmd_list(&ctx).await;
		return;
	}

	let rest = &args[1..];
	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("alwaysdown {}", env!("CARGO_PKG_VERSION")),
		"list" | "ls" | "status" | "st" => cmd_list(&ctx).await,
		"add" => cmd_add(&ctx, rest),
		"remove" | "rm" => cmd_remove(&ctx, rest).await,
		"rename" => cmd_rename(&ctx, rest).await,
		"run" => cmd_run(&ctx, rest).await,
		"up" => cmd_up(&ctx).await,
		"logs" => cmd_logs(&ctx, rest),
		"service" | "svc" => cmd_service(&ctx, rest).await,
		"autostart" => cmd_autostart(&ctx, rest).await,
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'alwaysdown help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} — keep application servers up", "alwaysdown".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [command] [app] [options]", "alwaysdown".bold());
	eprintln!();

	eprintln!("{}", "apps".cyan().bold());
	eprintln!("  {}                              Show apps and service status (default)", "list".bold());
	eprintln!("  {} <name> [dir] [-- command]     Register an app (default: npm run start)", "add".bold());
	eprintln!("  {} <name>                      Uninstall service, drop autostart, forget app", "remove".bold());
	eprintln!("  {} <name> <new-name>           Rename and migrate its service", "rename".bold());
	eprintln!();

	eprintln!("{}", "processes".cyan().bold());
	eprintln!("  {} <name>...                      Run in the foreground until Ctrl-C", "run".bold());
	eprintln!("  {}                                Run every app marked autostart", "up".bold());
	eprintln!();

	eprintln!("{}", "services".cyan().bold());
	eprintln!("  {} <install|uninstall|start|stop|status> <name>", "service".bold());
	eprintln!("  {} <name>                        Show the service log", "logs".bold());
	eprintln!("  {} <on|off> <name>          Start at login", "autostart".bold());
	eprintln!();

	eprintln!("{}", "environment".cyan().bold());
	eprintln!("  ALWAYSDOWN_LOG=debug             Engine diagnostics on stderr");
}

fn fail(msg: &str) -> ! {
	eprintln!("{} {}", "error:".red().bold(), msg);
	std::process::exit(1);
}

fn require_app(apps: &AppsFile, name: Option<&String>) -> ApplicationDescriptor {
	let Some(name) = name else {
		fail("missing app name");
	};
	match apps.find(name) {
		Some(app) => app.clone(),
		None => {
			let names: Vec<&str> = apps.apps.iter().map(|a| a.name.as_str()).collect();
			if names.is_empty() {
				fail(&format!("unknown app: {} (no apps registered)", name));
			}
			fail(&format!("unknown app: {} (registered: {})", name, names.join(", ")));
		}
	}
}

// --- List ---

async fn cmd_list(ctx: &Ctx) {
	let apps = ctx.apps();
	if apps.apps.is_empty() {
		eprintln!("no apps registered. add one with: alwaysdown add <name> [dir] [-- command]");
		return;
	}

	let registrar = ctx.registrar();
	let width = apps.apps.iter().map(|a| a.display_name().len()).max().unwrap_or(0);

	for app in &apps.apps {
		let name = app.service_identifier();
		let status = if registrar.service_exists(&name).await {
			// Service state wins over anything the app file remembers
			match registrar.status(&name).await {
				ServiceState::Running => format!("{}", "service running".green()),
				ServiceState::Stopped => format!("{}", "service stopped".yellow()),
			}
		} else {
			format!("{}", "no service".dimmed())
		};
		let auto = if app.auto_start { " autostart" } else { "" };
		println!(
			"  {:<width$}  {}  {}{}",
			app.display_name().bold(),
			status,
			app.start_command.dimmed(),
			auto.cyan(),
			width = width
		);
	}
}

// --- Add / remove / rename ---

fn cmd_add(ctx: &Ctx, args: &[String]) {
	let (before, command) = match args.iter().position(|a| a == "--") {
		Some(i) => (&args[..i], Some(args[i + 1..].join(" "))),
		None => (args, None),
	};

	let Some(name) = before.first() else {
		fail("usage: alwaysdown add <name> [dir] [-- command]");
	};
	let dir = match before.get(1) {
		Some(d) => alwaysdown::paths::expand_tilde(d),
		None => std::env::current_dir().unwrap_or_else(|e| fail(&e.to_string())),
	};
	let dir = dir.canonicalize().unwrap_or(dir);
	if !dir.is_dir() {
		fail(&format!("directory does not exist: {}", dir.display()));
	}

	let mut apps = ctx.apps();
	if apps.find(name).is_some() {
		eprintln!("{}: already registered", name);
		return;
	}

	let mut app = ApplicationDescriptor::new(name.as_str(), dir.to_string_lossy(), "npm run start");
	if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
		app.start_command = command;
	}
	app.environment_variables.extend(apps.settings.global_environment_variables.clone());

	eprintln!("{}: added ({}, {})", name, dir.display(), app.start_command);
	apps.apps.push(app);
	ctx.save(&apps);
}

async fn cmd_remove(ctx: &Ctx, args: &[String]) {
	let mut apps = ctx.apps();
	let app = require_app(&apps, args.first());
	let registrar = ctx.registrar();

	if let Err(e) = registrar.uninstall(&app.service_identifier()).await {
		fail(&format!("{}: uninstall failed: {}", app.display_name(), e));
	}
	if let Err(e) = registrar.set_autostart(&app, false).await {
		tracing::warn!("{}: failed to remove autostart entry: {}", app.display_name(), e);
	}

	apps.remove(app.id());
	ctx.save(&apps);
	eprintln!("{}: removed", app.display_name());
}

async fn cmd_rename(ctx: &Ctx, args: &[String]) {
	let mut apps = ctx.apps();
	let app = require_app(&apps, args.first());
	let Some(new_name) = args.get(1) else {
		fail("usage: alwaysdown rename <name> <new-name>");
	};

	let old_service = app.service_identifier();
	let Some(entry) = apps.find_mut(app.id()) else {
		fail("app disappeared while renaming");
	};
	entry.name = new_name.clone();
	let renamed = entry.clone();

	if let Err(e) = ctx.registrar().migrate(&old_service, &renamed).await {
		fail(&format!("{}: {}", renamed.display_name(), e));
	}
	ctx.save(&apps);
	eprintln!("{} -> {} ({})", app.display_name(), new_name, renamed.service_identifier());
}

// --- Foreground supervision ---

async fn cmd_run(ctx: &Ctx, args: &[String]) {
	if args.is_empty() {
		fail("usage: alwaysdown run <name>...");
	}
	let apps = ctx.apps();
	let selected: Vec<ApplicationDescriptor> = args.iter().map(|n| require_app(&apps, Some(n))).collect();
	supervise(ctx, selected).await;
}

async fn cmd_up(ctx: &Ctx) {
	let apps = ctx.apps();
	let selected: Vec<ApplicationDescriptor> = apps.apps.into_iter().filter(|a| a.auto_start).collect();
	if selected.is_empty() {
		eprintln!("no apps marked autostart");
		return;
	}
	supervise(ctx, selected).await;
}

async fn supervise(ctx: &Ctx, mut selected: Vec<ApplicationDescriptor>) {
	let sup = ctx.supervisor();
	let mut events = sup.subscribe();

	for app in selected.iter_mut() {
		match sup.start_application(app).await {
			Ok(pid) => eprintln!("{}: {} (pid {})", app.display_name(), "started".green(), pid),
			Err(e) => eprintln!("{}: {} {}", app.display_name(), "failed:".red(), e),
		}
	}

	let names: std::collections::HashMap<String, String> =
		selected.iter().map(|a| (a.id().to_string(), a.display_name())).collect();
	let width = names.values().map(|n| n.len()).max().unwrap_or(0);

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			event = events.recv() => match event {
				Ok(SupervisorEvent::LogReceived { id, line, is_error }) => {
					let name = names.get(&id).map(String::as_str).unwrap_or("?");
					if is_error {
						println!("{:<width$} | {}", name.cyan(), line.red(), width = width);
					} else {
						println!("{:<width$} | {}", name.cyan(), line, width = width);
					}
				}
				Ok(SupervisorEvent::StatusChanged { id, is_running: false, .. }) => {
					let name = names.get(&id).map(String::as_str).unwrap_or("?");
					eprintln!("{}: {}", name, "stopped".yellow());
					if !any_running(&sup, &selected).await {
						break;
					}
				}
				Ok(_) => {}
				Err(RecvError::Lagged(n)) => eprintln!("({} log lines skipped)", n),
				Err(RecvError::Closed) => break,
			}
		}
	}

	eprintln!();
	for app in selected.iter_mut() {
		if let Err(e) = sup.stop_application(app).await {
			eprintln!("{}: {} {}", app.display_name(), "stop failed:".red(), e);
		}
	}
	sup.shutdown().await;
}

async fn any_running(sup: &Supervisor, apps: &[ApplicationDescriptor]) -> bool {
	for app in apps {
		if sup.is_application_running(app.id()).await {
			return true;
		}
	}
	false
}

// --- Services ---

fn cmd_logs(ctx: &Ctx, args: &[String]) {
	let apps = ctx.apps();
	let app = require_app(&apps, args.first());
	let registrar = ctx.registrar();
	print!("{}", registrar.read_service_log(&app));
}

async fn cmd_service(ctx: &Ctx, args: &[String]) {
	let usage = "usage: alwaysdown service <install|uninstall|start|stop|status> <name>";
	let Some(action) = args.first() else {
		fail(usage);
	};
	let apps = ctx.apps();
	let app = require_app(&apps, args.get(1));
	let registrar = ctx.registrar();
	let name = app.service_identifier();

	let result = match action.as_str() {
		"install" => registrar.install(&app).await,
		"uninstall" => registrar.uninstall(&name).await,
		"start" => registrar.start(&name).await,
		"stop" => registrar.stop(&name).await,
		"status" => {
			let state = if registrar.service_exists(&name).await {
				format!("{:?}", registrar.status(&name).await).to_lowercase()
			} else {
				"not installed".to_string()
			};
			println!("{} ({}, {}): {}", app.display_name(), name, registrar.backend_name(), state);
			println!("log: {}", registrar.service_log_path(&app).display());
			return;
		}
		_ => fail(usage),
	};

	match result {
		Ok(()) => eprintln!("{}: {} {}", app.display_name(), action, "ok".green()),
		Err(e) if matches!(e, alwaysdown::EngineError::PrivilegeRequired(_)) => {
			fail(&format!("{} (try again as root / administrator, or set [services] scope = \"user\")", e))
		}
		Err(e) => fail(&format!("{}: {}", app.display_name(), e)),
	}
}

async fn cmd_autostart(ctx: &Ctx, args: &[String]) {
	let enabled = match args.first().map(|s| s.as_str()) {
		Some("on") => true,
		Some("off") => false,
		_ => fail("usage: alwaysdown autostart <on|off> <name>"),
	};
	let mut apps = ctx.apps();
	let app = require_app(&apps, args.get(1));

	if let Err(e) = ctx.registrar().set_autostart(&app, enabled).await {
		fail(&format!("{}: {}", app.display_name(), e));
	}
	if let Some(entry) = apps.find_mut(app.id()) {
		entry.auto_start = enabled;
	}
	ctx.save(&apps);
	eprintln!("{}: autostart {}", app.display_name(), if enabled { "on" } else { "off" });
}
