//! pimetrics - periodic probes for small Linux hosts
//!
//! This crate provides the building blocks of the `pimetrics` binary. It can
//! be used as a library to define custom probes, or run standalone with a
//! YAML configuration.
//!
//! # Architecture
//!
//! - **Probes**: measure / process / report one value per run from files,
//!   `/sys` attributes, long-running commands or HTTP APIs
//! - **Reader**: background draining of a child process' stdout
//! - **Scheduler**: single control loop running probes at their intervals
//! - **Sink**: reporting boundary receiving samples
//! - **Config**: YAML probe definitions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pimetrics::probe::file::DividedFileProbe;
//! use pimetrics::probe::process::ProcessProbe;
//! use pimetrics::Scheduler;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scheduler = Scheduler::new();
//!     scheduler.register(
//!         DividedFileProbe::with_divisor("/sys/class/thermal/thermal_zone0/temp", 1000.0)?,
//!         Duration::from_secs(5),
//!     )?;
//!     scheduler.register(ProcessProbe::from_command_line("ping 127.0.0.1")?, Duration::from_secs(1))?;
//!
//!     scheduler.run_for(Duration::from_secs(60)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod probe;
pub mod reader;
pub mod scheduler;
pub mod sink;

pub use probe::{Measured, Probe, ProbeError, ProbeGroup, Runnable};
pub use reader::BackgroundLineReader;
pub use scheduler::{ScheduledProbeEntry, Scheduler, SchedulerError};
pub use sink::{Sample, Sink, SinkError};
