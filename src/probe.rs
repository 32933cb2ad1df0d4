//! Probe Layer
//!
//! Probes measure one data point per run from a source, process it and
//! report it. The scheduler drives them through the object-safe
//! [`Runnable`] handle.
//!
//! # Architecture
//!
//! - [`Probe`]: measure / process / report pipeline with a last-value slot
//! - [`file`]: whole-file and divided numeric (`/sys`) probes
//! - [`process`]: probes draining the output of a long-running command
//! - [`api`]: HTTP API client and endpoint probe
//! - [`stub`]: fixture-backed API client for tests
//! - [`ProbeGroup`]: probes of one type run as a unit
//!
//! # Example
//!
//! ```rust,no_run
//! use pimetrics::probe::file::DividedFileProbe;
//! use pimetrics::{Probe, Runnable};
//!
//! # async fn demo() -> Result<(), pimetrics::ProbeError> {
//! let mut freq =
//!     DividedFileProbe::with_divisor("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", 1000.0)?;
//! freq.run().await?;
//! println!("cpu0: {:?} MHz", freq.measured());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod file;
mod group;
pub mod process;
pub mod stub;
mod traits;

pub use group::ProbeGroup;
pub use traits::{Measured, Probe, ProbeError, Runnable};
