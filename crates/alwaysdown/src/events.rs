use serde::{Deserialize, Serialize};

/// Notifications published by the supervisor.
///
/// Log lines for one application are delivered in the order they were
/// written. A status change is published once per transition. Receivers that
/// fall behind the channel capacity get `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
	StatusChanged {
		id: String,
		is_running: bool,
		process_id: Option<u32>,
	},
	LogReceived {
		id: String,
		line: String,
		is_error: bool,
	},
}

impl SupervisorEvent {
	pub fn app_id(&self) -> &str {
		match self {
			SupervisorEvent::StatusChanged { id, .. } => id,
			SupervisorEvent::LogReceived { id, .. } => id,
		}
	}
}
