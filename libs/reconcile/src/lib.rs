//! Container lifecycle reconciliation primitives.
//!
//! This library holds the pure half of the reconciler: everything that can be
//! decided without talking to a container runtime.
//!
//! - **Desired state**: a declared resource resolved into a canonical
//!   [`ContainerSpec`] ([`DeclaredContainer::resolve`]).
//! - **Current state**: a [`LifecycleState`] plus the spec recovered from the
//!   runtime (produced by the agent's prober).
//! - **Convergence**: the ordered [`Step`]s from [`plan`] that take the
//!   current state to the declared action's outcome.
//!
//! # Invariants
//!
//! - A plan for a state that already satisfies the action is empty
//! - Decisions are deterministic given the same inputs
//! - Ports, binds and volumes-from compare as sets

pub mod error;
pub mod image;
pub mod resource;
pub mod spec;
pub mod state;

pub use error::{ErrorKind, ParseError, ReconcileError};
pub use image::{ImageRef, DEFAULT_TAG};
pub use resource::{
    ActionOptions, ActionRequest, ConvergenceResult, DeclaredContainer, DeclaredImage,
    DeclaredResource, ImageAction, ImageRequest, ImageResult, ResourceFile,
};
pub use spec::{BindMount, Command, ContainerSpec, PortMapping, Protocol, SpecField, SpecHash};
pub use state::{plan, Action, LifecycleState, Step};

/// Label carrying the spec fingerprint of containers created by the reconciler.
pub const SPEC_HASH_LABEL: &str = "dockhand.spec-hash";
