//! Service identifier normalization.
//!
//! A service identifier doubles as the OS service name and the log file stem,
//! so it is restricted to `[A-Za-z0-9_.-]` and carries a fixed namespace
//! prefix. Distinct names can normalize to the same identifier
//! (`"a b"` and `"a_b"`); callers that care must check for collisions.

pub const SERVICE_PREFIX: &str = "AlwaysDown_";
pub const PLACEHOLDER: &str = "App";

/// Derives the identifier for a descriptor from its name, falling back to the
/// last segment of the project path.
pub fn derive_service_identifier(name: &str, project_path: &str) -> String {
	let source = if !name.trim().is_empty() {
		name.to_string()
	} else {
		last_segment(project_path).unwrap_or_default()
	};
	normalize(&source)
}

pub fn normalize(input: &str) -> String {
	let mut out = String::with_capacity(input.len() + SERVICE_PREFIX.len());
	for c in input.chars() {
		let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
			c
		} else {
			'_'
		};
		if c == '_' && out.ends_with('_') {
			continue;
		}
		out.push(c);
	}

	let trimmed = out.trim_matches('_');
	let body = if trimmed.is_empty() { PLACEHOLDER } else { trimmed };

	if body.starts_with(SERVICE_PREFIX) {
		body.to_string()
	} else {
		format!("{}{}", SERVICE_PREFIX, body)
	}
}

fn last_segment(path: &str) -> Option<String> {
	let trimmed = path.trim_end_matches(['/', '\\']);
	if trimmed.is_empty() {
		return None;
	}
	// Split by hand so Windows paths behave the same on every host.
	trimmed.rsplit(['/', '\\']).next().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_basic() {
		assert_eq!(normalize("Foo"), "AlwaysDown_Foo");
		assert_eq!(normalize("Foo!! Bar"), "AlwaysDown_Foo_Bar");
		assert_eq!(normalize("my-app.v2"), "AlwaysDown_my-app.v2");
		assert_eq!(normalize("__weird__name__"), "AlwaysDown_weird_name");
	}

	#[test]
	fn test_normalize_empty_uses_placeholder() {
		assert_eq!(normalize(""), "AlwaysDown_App");
		assert_eq!(normalize("!!!"), "AlwaysDown_App");
		assert_eq!(derive_service_identifier("", ""), "AlwaysDown_App");
		assert_eq!(derive_service_identifier("   ", ""), "AlwaysDown_App");
	}

	#[test]
	fn test_normalize_idempotent() {
		let inputs = [
			"", "Foo", "Foo!! Bar", "  spaced  out ", "ünïcödé", "a__b", "AlwaysDown_x",
			"___", "dots...and--dashes", "C:\\apps\\web",
		];
		for input in inputs {
			let once = normalize(input);
			assert_eq!(normalize(&once), once, "not idempotent for {:?}", input);
			assert_eq!(normalize(input), once, "not deterministic for {:?}", input);
		}
	}

	#[test]
	fn test_falls_back_to_project_path() {
		assert_eq!(derive_service_identifier("", "/srv/apps/web-api"), "AlwaysDown_web-api");
		assert_eq!(derive_service_identifier("", "/srv/apps/web-api/"), "AlwaysDown_web-api");
		assert_eq!(derive_service_identifier("", "C:\\apps\\shop front"), "AlwaysDown_shop_front");
		assert_eq!(derive_service_identifier("Api", "/srv/other"), "AlwaysDown_Api");
	}

	#[test]
	fn test_collisions_are_accepted() {
		assert_eq!(normalize("a b"), normalize("a_b"));
	}
}
