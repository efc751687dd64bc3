use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{ServiceBackend, ServiceSpec, ServiceState, StartupEntry};
use crate::error::{EngineError, EngineResult};
use crate::launcher::ScriptKind;

/// In-memory service manager. Records every call and can be told to hang
/// queries, refuse registrations and removals, or accept transitions without
/// ever completing them.
#[derive(Default)]
pub struct FakeBackend {
	state: Mutex<FakeState>,
	hang_queries: AtomicBool,
	deny_create: AtomicBool,
	deny_delete: AtomicBool,
	stall_transitions: AtomicBool,
}

#[derive(Default)]
struct FakeState {
	services: HashMap<String, FakeService>,
	startup: HashMap<String, StartupEntry>,
	calls: Vec<String>,
}

struct FakeService {
	spec: Option<ServiceSpec>,
	state: ServiceState,
}

impl FakeBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queries never return.
	pub fn hang_queries(&self, on: bool) {
		self.hang_queries.store(on, Ordering::SeqCst);
	}

	/// `create` fails with `PrivilegeRequired`.
	pub fn deny_create(&self, on: bool) {
		self.deny_create.store(on, Ordering::SeqCst);
	}

	/// `delete` fails with `PrivilegeRequired`.
	pub fn deny_delete(&self, on: bool) {
		self.deny_delete.store(on, Ordering::SeqCst);
	}

	/// `start`/`stop` succeed but the state never changes.
	pub fn stall_transitions(&self, on: bool) {
		self.stall_transitions.store(on, Ordering::SeqCst);
	}

	/// Seeds a registered service without recording a call.
	pub fn insert(&self, name: &str, state: ServiceState) {
		self.lock().services.insert(name.to_string(), FakeService { spec: None, state });
	}

	pub fn state_of(&self, name: &str) -> Option<ServiceState> {
		self.lock().services.get(name).map(|s| s.state)
	}

	pub fn spec_of(&self, name: &str) -> Option<ServiceSpec> {
		self.lock().services.get(name).and_then(|s| s.spec.clone())
	}

	pub fn service_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.lock().services.keys().cloned().collect();
		names.sort();
		names
	}

	pub fn startup_entry(&self, key: &str) -> Option<StartupEntry> {
		self.lock().startup.get(key).cloned()
	}

	/// Calls made so far, as `"<op> <name>"`.
	pub fn calls(&self) -> Vec<String> {
		self.lock().calls.clone()
	}

	/// Calls that change OS state (everything except `query`).
	pub fn mutations(&self) -> Vec<String> {
		self.calls().into_iter().filter(|c| !c.starts_with("query ")).collect()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
		match self.state.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	fn record(&self, op: &str, name: &str) {
		self.lock().calls.push(format!("{} {}", op, name));
	}

	fn transition(&self, name: &str, target: ServiceState) -> EngineResult<()> {
		let stall = self.stall_transitions.load(Ordering::SeqCst);
		let mut state = self.lock();
		let service = state
			.services
			.get_mut(name)
			.ok_or_else(|| EngineError::NotFound(format!("service {}", name)))?;
		if !stall {
			service.state = target;
		}
		Ok(())
	}
}

#[async_trait]
impl ServiceBackend for FakeBackend {
	fn name(&self) -> &'static str {
		"fake"
	}

	fn script_kind(&self) -> ScriptKind {
		ScriptKind::native()
	}

	async fn query(&self, name: &str) -> EngineResult<Option<ServiceState>> {
		self.record("query", name);
		if self.hang_queries.load(Ordering::SeqCst) {
			std::future::pending::<()>().await;
		}
		Ok(self.state_of(name))
	}

	async fn create(&self, spec: &ServiceSpec) -> EngineResult<()> {
		self.record("create", &spec.name);
		if self.deny_create.load(Ordering::SeqCst) {
			return Err(EngineError::PrivilegeRequired(format!("create {}: access denied", spec.name)));
		}
		let mut state = self.lock();
		if state.services.contains_key(&spec.name) {
			return Err(EngineError::AlreadyExists(spec.name.clone()));
		}
		state.services.insert(
			spec.name.clone(),
			FakeService { spec: Some(spec.clone()), state: ServiceState::Stopped },
		);
		Ok(())
	}

	async fn delete(&self, name: &str) -> EngineResult<()> {
		self.record("delete", name);
		if self.deny_delete.load(Ordering::SeqCst) {
			return Err(EngineError::PrivilegeRequired(format!("delete {}: access denied", name)));
		}
		self.lock()
			.services
			.remove(name)
			.map(|_| ())
			.ok_or_else(|| EngineError::NotFound(format!("service {}", name)))
	}

	async fn start(&self, name: &str) -> EngineResult<()> {
		self.record("start", name);
		self.transition(name, ServiceState::Running)
	}

	async fn stop(&self, name: &str) -> EngineResult<()> {
		self.record("stop", name);
		self.transition(name, ServiceState::Stopped)
	}

	async fn register_startup(&self, entry: &StartupEntry) -> EngineResult<()> {
		self.record("register_startup", &entry.key);
		self.lock().startup.insert(entry.key.clone(), entry.clone());
		Ok(())
	}

	async fn unregister_startup(&self, key: &str) -> EngineResult<()> {
		self.record("unregister_startup", key);
		self.lock().startup.remove(key);
		Ok(())
	}
}
