//! Observation port over the host CRM page.
//!
//! Everything the agent knows about the page goes through [`HostPort`]: the current path, a
//! document snapshot (elements plus the component-instance graph), live state of a target,
//! activation, the boot readiness probe, and navigation signals.

pub mod components;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod scripts;
pub mod signals;
pub mod walker;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use components::{CollectionState, ComponentGraph, ComponentRecord, ComponentRef, ComponentUid};
pub use errors::PerceiverError;
pub use model::{
    ActionTarget, Activation, AppRoot, DocumentSnapshot, DomNode, ElementHandle, LiveState, NodeId,
    Readiness, ReloadHandle,
};
pub use ports::{AdapterPort, HostOptions, HostPort, DEFAULT_BINDING_NAME};
pub use walker::find_named_component;
