//! Version lifecycle: install, activation handoff, invalidation.

pub mod clients;
pub mod controller;
pub mod keepalive;

pub use clients::{Client, ClientMessage, ClientRegistry};
pub use controller::{
    ActivationReport, Command, CommandOutcome, InstallReport, InvalidationReport,
    LifecycleController, LifecycleState, Manifest,
};
pub use keepalive::KeepAlive;
