use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
	/// Missing project path, or no such service.
	#[error("not found: {0}")]
	NotFound(String),

	#[error("timed out: {0}")]
	Timeout(String),

	/// Migration target already registered.
	#[error("already exists: {0}")]
	AlreadyExists(String),

	/// An OS control tool ran but reported failure.
	#[error("control failure: {0}")]
	ControlFailure(String),

	#[error("spawn failed: {0}")]
	SpawnFailure(String),

	#[error("elevated privileges required: {0}")]
	PrivilegeRequired(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl EngineError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, EngineError::Timeout(_))
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, EngineError::NotFound(_))
	}

	/// Maps permission-denied io errors to `PrivilegeRequired`.
	pub fn from_io(context: &str, err: std::io::Error) -> Self {
		if err.kind() == std::io::ErrorKind::PermissionDenied {
			EngineError::PrivilegeRequired(format!("{}: {}", context, err))
		} else {
			EngineError::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err)))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn permission_denied_maps_to_privilege_required() {
		let err = EngineError::from_io(
			"write unit",
			std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
		);
		assert!(matches!(err, EngineError::PrivilegeRequired(_)));

		let err = EngineError::from_io(
			"write unit",
			std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
		);
		assert!(matches!(err, EngineError::Io(_)));
		assert!(err.to_string().contains("write unit"));
	}
}
