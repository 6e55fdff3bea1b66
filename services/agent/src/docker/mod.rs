//! Docker Engine runtime implementation.
//!
//! ## Components
//!
//! - `api`: HTTP client for the engine's Unix socket API
//! - `types`: request/response bodies and their mapping to reconciler types
//! - `runtime`: `Runtime` trait implementation

mod api;
mod runtime;
mod types;

pub use api::{DockerApiError, DockerClient, API_VERSION};
pub use runtime::{pack_context, DockerRuntime};
