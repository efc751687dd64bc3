//! # alwaysdown
//!
//! Process and service supervision engine.
//!
//! Two independent components share an [`ApplicationDescriptor`]:
//!
//! - [`Supervisor`] owns at most one child process per descriptor: start,
//!   escalating stop, restart, output capture and crash detection.
//! - [`ServiceRegistrar`] registers the descriptor as an OS service (systemd,
//!   launchd, or the Windows service manager) with restart-on-failure, and
//!   drives it with bounded waits.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use alwaysdown::{ApplicationDescriptor, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> alwaysdown::EngineResult<()> {
//! let sup = Supervisor::new(SupervisorConfig::new("/tmp/alwaysdown/logs"));
//! let mut app = ApplicationDescriptor::new("api", "/srv/api", "node server.js");
//!
//! let pid = sup.start_application(&mut app).await?;
//! println!("running as {}", pid);
//! sup.stop_application(&mut app).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod identifier;
pub mod launcher;
pub mod output;
pub mod paths;
pub mod registrar;
pub mod supervisor;
pub mod terminate;

pub use backend::{platform_backend, FakeBackend, RecoveryPolicy, ServiceBackend, ServiceState};
pub use config::{load_engine_config, EngineConfig, GlobalSettings, ServiceScope};
pub use descriptor::ApplicationDescriptor;
pub use error::{EngineError, EngineResult};
pub use events::SupervisorEvent;
pub use identifier::derive_service_identifier;
pub use paths::EnginePaths;
pub use registrar::{RegistrarConfig, ServiceRegistrar};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use terminate::{SystemTerminator, Terminator};
