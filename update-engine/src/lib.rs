#![forbid(unsafe_code)]
#![warn(unreachable_pub)]

//! Client side of the appliance update protocol.
//!
//! A command resolves an [`Instance`] to a [`Target`], connects a
//! [`DeviceClient`] (which probes the device's features), and then drives the
//! device with the [`Orchestrator`], the log follower in [`logs`], or the
//! local tools in [`overwrite`] and [`sbom`].

pub mod build;
mod client;
pub mod divert;
mod error;
mod instance;
mod lock;
pub mod logs;
pub mod orchestrator;
pub mod overwrite;
pub mod probe;
pub mod push;
pub mod retry;
pub mod sbom;
mod settings;
pub mod target;
pub mod tls;
pub mod upload;

pub use client::DeviceClient;
pub use error::{Error, ErrorKind};
pub use instance::{Instance, PackageSource};
pub use lock::InstanceLock;
pub use orchestrator::{Orchestrator, UpdateReport, UpdateState};
pub use settings::EngineSettings;
pub use target::Target;
