// src/exec/mod.rs

//! Sandbox provisioning and process execution layer.
//!
//! - [`sandbox`] defines the per-run [`SandboxHandle`] and the
//!   [`ProvisionError`] taxonomy.
//! - [`process`] runs a command with a hard timeout using
//!   `tokio::process::Command`, capturing stdout/stderr and the exit code.
//! - [`backend`] provides the [`Provisioner`] trait and the concrete
//!   [`VenvProvisioner`] used in production, which tests can replace with a
//!   fake implementation.

pub mod backend;
pub mod process;
pub mod sandbox;

pub use backend::{Provisioner, VenvProvisioner};
pub use process::{ExecError, ProcessOutcome};
pub use sandbox::{ProvisionError, ProvisionRequest, SandboxHandle};
