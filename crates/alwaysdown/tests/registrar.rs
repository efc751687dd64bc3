use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alwaysdown::{
	ApplicationDescriptor, EngineError, FakeBackend, RecoveryPolicy, RegistrarConfig, ServiceRegistrar,
	ServiceState,
};

fn test_registrar(dir: &Path) -> (Arc<FakeBackend>, ServiceRegistrar) {
	let fake = Arc::new(FakeBackend::new());
	let mut config = RegistrarConfig::new(dir.join("state"));
	config.query_timeout = Duration::from_millis(200);
	config.transition_timeout = Duration::from_millis(500);
	config.control_timeout = Duration::from_secs(2);
	config.poll_interval = Duration::from_millis(20);
	(fake.clone(), ServiceRegistrar::new(fake, config))
}

fn app_in(dir: &Path, name: &str) -> ApplicationDescriptor {
	let project = dir.join("projects").join(name.replace(['!', ' '], "_"));
	std::fs::create_dir_all(&project).unwrap();
	let mut app = ApplicationDescriptor::new(name, project.to_string_lossy(), "npm run start");
	app.description = "storefront".into();
	app
}

// --- Probes ---

#[tokio::test]
async fn probes_are_bounded_when_the_manager_hangs() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Running);
	fake.hang_queries(true);

	let started = Instant::now();
	assert!(!reg.service_exists("AlwaysDown_Api").await);
	assert_eq!(reg.status("AlwaysDown_Api").await, ServiceState::Stopped);
	assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn probes_report_registered_state() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Running);

	assert!(reg.service_exists("AlwaysDown_Api").await);
	assert_eq!(reg.status("AlwaysDown_Api").await, ServiceState::Running);
	assert!(!reg.service_exists("AlwaysDown_Other").await);
	assert_eq!(reg.status("AlwaysDown_Other").await, ServiceState::Stopped);
}

// --- Install / uninstall ---

#[tokio::test]
async fn install_writes_launcher_and_registers() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Shop");

	reg.install(&app).await.unwrap();

	assert_eq!(fake.state_of("AlwaysDown_Shop"), Some(ServiceState::Stopped));
	let spec = fake.spec_of("AlwaysDown_Shop").unwrap();
	assert_eq!(spec.display_name, "AlwaysDown - Shop");
	assert_eq!(spec.description, "Application service for Shop - storefront");
	assert_eq!(spec.recovery, RecoveryPolicy::default());
	assert_eq!(spec.log_file, reg.service_log_path(&app));

	let script = std::fs::read_to_string(&spec.launcher).unwrap();
	assert!(script.contains("npm run start"));
	assert!(script.contains("NODE_ENV"));
	assert!(spec.launcher.starts_with(&reg.config.services_dir));
}

#[tokio::test]
async fn install_surfaces_privilege_errors() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.deny_create(true);
	let app = app_in(dir.path(), "Shop");

	let err = reg.install(&app).await.unwrap_err();
	assert!(matches!(err, EngineError::PrivilegeRequired(_)), "unexpected error: {}", err);
	assert!(fake.service_names().is_empty());
}

#[tokio::test]
async fn uninstall_missing_service_is_ok() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());

	reg.uninstall("AlwaysDown_Nothing").await.unwrap();
	assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn uninstall_stops_deletes_and_cleans_up() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Shop");

	reg.install(&app).await.unwrap();
	reg.start("AlwaysDown_Shop").await.unwrap();
	let launcher = fake.spec_of("AlwaysDown_Shop").unwrap().launcher;

	reg.uninstall("AlwaysDown_Shop").await.unwrap();
	assert!(fake.service_names().is_empty());
	assert!(!launcher.exists());
	assert_eq!(
		fake.mutations(),
		vec!["create AlwaysDown_Shop", "start AlwaysDown_Shop", "stop AlwaysDown_Shop", "delete AlwaysDown_Shop"]
	);
}

#[tokio::test]
async fn uninstall_fails_when_the_manager_hangs() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Running);
	fake.hang_queries(true);

	let err = reg.uninstall("AlwaysDown_Api").await.unwrap_err();
	assert!(err.is_timeout(), "unexpected error: {}", err);
	assert_eq!(fake.service_names(), vec!["AlwaysDown_Api"]);
	assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn uninstall_removes_launcher_left_by_failed_install() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.deny_create(true);
	let app = app_in(dir.path(), "Shop");
	let launcher = reg.launcher_path("AlwaysDown_Shop", alwaysdown::launcher::ScriptKind::native());

	reg.install(&app).await.unwrap_err();
	assert!(launcher.exists());

	reg.uninstall("AlwaysDown_Shop").await.unwrap();
	assert!(!launcher.exists());
	assert_eq!(fake.mutations(), vec!["create AlwaysDown_Shop"]);
}

#[tokio::test]
async fn uninstall_surfaces_delete_failures() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Stopped);
	fake.deny_delete(true);

	let err = reg.uninstall("AlwaysDown_Api").await.unwrap_err();
	assert!(matches!(err, EngineError::PrivilegeRequired(_)), "unexpected error: {}", err);
	assert_eq!(fake.service_names(), vec!["AlwaysDown_Api"]);
}

// --- Start / stop ---

#[tokio::test]
async fn transitions_skip_when_already_in_target_state() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Running);

	reg.start("AlwaysDown_Api").await.unwrap();
	assert!(fake.mutations().is_empty());

	reg.stop("AlwaysDown_Api").await.unwrap();
	assert_eq!(fake.state_of("AlwaysDown_Api"), Some(ServiceState::Stopped));
	reg.stop("AlwaysDown_Api").await.unwrap();
	assert_eq!(fake.mutations(), vec!["stop AlwaysDown_Api"]);
}

#[tokio::test]
async fn start_of_missing_service_is_not_found() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());

	let err = reg.start("AlwaysDown_Missing").await.unwrap_err();
	assert!(err.is_not_found(), "unexpected error: {}", err);
	assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn stalled_transition_times_out() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Stopped);
	fake.stall_transitions(true);

	let started = Instant::now();
	let err = reg.start("AlwaysDown_Api").await.unwrap_err();
	assert!(err.is_timeout(), "unexpected error: {}", err);
	assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn hanging_status_query_times_out_transition() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	fake.insert("AlwaysDown_Api", ServiceState::Stopped);
	fake.hang_queries(true);

	let err = reg.start("AlwaysDown_Api").await.unwrap_err();
	assert!(err.is_timeout(), "unexpected error: {}", err);
	assert!(fake.mutations().is_empty());
}

// --- Migrate ---

#[tokio::test]
async fn migrate_to_same_name_is_a_no_op() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Api");
	fake.insert("AlwaysDown_Api", ServiceState::Running);

	reg.migrate("AlwaysDown_Api", &app).await.unwrap();
	assert!(fake.calls().is_empty());
	assert_eq!(fake.state_of("AlwaysDown_Api"), Some(ServiceState::Running));
}

#[tokio::test]
async fn migrate_without_old_service_is_a_no_op() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Api");

	reg.migrate("AlwaysDown_Old", &app).await.unwrap();
	assert!(fake.mutations().is_empty());
	assert!(fake.service_names().is_empty());
}

#[tokio::test]
async fn migrate_onto_existing_service_fails_without_side_effects() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Api");
	fake.insert("AlwaysDown_Old", ServiceState::Running);
	fake.insert("AlwaysDown_Api", ServiceState::Stopped);

	let err = reg.migrate("AlwaysDown_Old", &app).await.unwrap_err();
	assert!(matches!(err, EngineError::AlreadyExists(_)), "unexpected error: {}", err);
	assert!(fake.mutations().is_empty());
	assert_eq!(fake.state_of("AlwaysDown_Old"), Some(ServiceState::Running));
	assert_eq!(fake.state_of("AlwaysDown_Api"), Some(ServiceState::Stopped));
}

#[tokio::test]
async fn rename_then_migrate_moves_the_service() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let mut app = app_in(dir.path(), "Foo");
	assert_eq!(app.service_identifier(), "AlwaysDown_Foo");

	reg.install(&app).await.unwrap();
	reg.start("AlwaysDown_Foo").await.unwrap();

	let old = app.service_identifier();
	app.name = "Foo!! Bar".into();
	assert_eq!(app.service_identifier(), "AlwaysDown_Foo_Bar");

	reg.migrate(&old, &app).await.unwrap();
	assert_eq!(fake.service_names(), vec!["AlwaysDown_Foo_Bar"]);
	assert_eq!(fake.state_of("AlwaysDown_Foo_Bar"), Some(ServiceState::Stopped));
	assert_eq!(
		fake.spec_of("AlwaysDown_Foo_Bar").unwrap().display_name,
		"AlwaysDown - Foo!! Bar"
	);
	assert!(!reg.launcher_path(&old, alwaysdown::launcher::ScriptKind::native()).exists());
}

#[tokio::test]
async fn migrate_keeps_old_service_when_it_cannot_be_removed() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let mut app = app_in(dir.path(), "Foo");
	reg.install(&app).await.unwrap();
	fake.deny_delete(true);

	let old = app.service_identifier();
	app.name = "Foo!! Bar".into();

	let err = reg.migrate(&old, &app).await.unwrap_err();
	assert!(matches!(err, EngineError::PrivilegeRequired(_)), "unexpected error: {}", err);
	assert_eq!(fake.service_names(), vec!["AlwaysDown_Foo"]);
	assert!(!fake.mutations().contains(&"create AlwaysDown_Foo_Bar".to_string()));
}

// --- Autostart ---

#[tokio::test]
async fn autostart_is_idempotent() {
	let dir = tempfile::tempdir().unwrap();
	let (fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Api");
	let key = app.startup_key();

	reg.set_autostart(&app, true).await.unwrap();
	reg.set_autostart(&app, true).await.unwrap();
	let entry = fake.startup_entry(&key).unwrap();
	assert!(entry.script.exists());
	assert_eq!(entry.display_name, "Api");

	reg.set_autostart(&app, false).await.unwrap();
	reg.set_autostart(&app, false).await.unwrap();
	assert!(fake.startup_entry(&key).is_none());
	assert!(!entry.script.exists());
}

// --- Service log ---

#[tokio::test]
async fn read_service_log_fallbacks() {
	let dir = tempfile::tempdir().unwrap();
	let (_fake, reg) = test_registrar(dir.path());
	let app = app_in(dir.path(), "Api");
	let path = reg.service_log_path(&app);

	assert_eq!(reg.read_service_log(&app), "No service logs found.");

	std::fs::create_dir_all(path.parent().unwrap()).unwrap();
	std::fs::write(&path, "[2026-01-01 00:00:00] Starting service for Api\n").unwrap();
	assert!(reg.read_service_log(&app).contains("Starting service for Api"));

	std::fs::remove_file(&path).unwrap();
	std::fs::create_dir_all(&path).unwrap();
	assert!(reg.read_service_log(&app).starts_with("Error reading service logs:"));
}
