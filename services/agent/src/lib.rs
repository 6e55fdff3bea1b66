//! dockhand agent library
//!
//! Converges declared docker containers and images against a container
//! runtime. The pure decisions (spec resolution, drift, the transition table)
//! live in `dockhand-reconcile`; this crate owns everything that talks to the
//! runtime.
//!
//! ## Architecture
//!
//! ```text
//! declared resource
//!   └── resolve()            canonical ContainerSpec (dockhand-reconcile)
//!         └── StateProber    lifecycle state + actual spec
//!               └── ActionExecutor
//!                     ├── plan()  steps for (action, state)
//!                     └── Runtime  DockerRuntime | MockRuntime
//! ```
//!
//! ## Modules
//!
//! - `runtime`: Runtime trait and in-memory mock
//! - `docker`: Docker Engine API runtime over the Unix socket
//! - `prober`: State classification and spec recovery
//! - `executor`: Action state machine
//! - `redeploy`: Replace-on-drift orchestration
//! - `images`: Image pull/build convergence
//! - `converge`: Resource files converged in order

pub mod config;
pub mod converge;
pub mod docker;
pub mod executor;
pub mod images;
pub mod prober;
pub mod redeploy;
pub mod runtime;

// Re-export commonly used types
pub use config::Config;
pub use converge::{Converger, Outcome};
pub use executor::{ActionExecutor, ExecutorConfig};
pub use images::ImageConverger;
pub use prober::{Probe, StateProber};
pub use runtime::{MockRuntime, Runtime, RuntimeError};
