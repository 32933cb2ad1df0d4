//! Core probe traits and types.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::sink::SinkError;

/// Errors that can occur while constructing or running a probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The measured file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The command could not be launched because its executable is missing.
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    /// The spawned process stopped and all of its output has been drained.
    #[error("process '{command}' exited ({status})")]
    ProcessExited {
        /// Command line of the process.
        command: String,
        /// Exit status, when it could be collected.
        status: String,
    },

    /// File or process I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Measured text could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid probe configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Reporting to the sink failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Slot holding the last processed value of a probe.
#[derive(Debug, Clone)]
pub struct Measured<T>(Option<T>);

impl<T> Measured<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self(None)
    }

    /// Last stored value, if any run has completed.
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Replace the stored value.
    pub fn store(&mut self, value: T) {
        self.0 = Some(value);
    }
}

impl<T> Default for Measured<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A probe measures a raw value, processes it and reports the result.
///
/// Calling code drives a probe through [`Runnable::run`], which executes
/// [`measure`](Probe::measure), [`process`](Probe::process) and
/// [`report`](Probe::report) in sequence and keeps the processed value
/// available through [`measured`](Probe::measured).
///
/// # Implementing
///
/// - `measure()` reads the source and is the only required I/O step.
/// - `process()` turns the raw value into the reported one. Probes whose raw
///   and processed values coincide return the raw value unchanged.
/// - `report()` is the extension point towards a metrics system. The default
///   does nothing: the processed value is already stored by `run()`.
/// - `slot()` / `slot_mut()` expose the probe's [`Measured`] storage.
///
/// Wrapping an existing probe and delegating `measure()` to it is the usual
/// way to specialize processing (see [`NumericProcessProbe`]).
///
/// [`NumericProcessProbe`]: crate::probe::process::NumericProcessProbe
#[async_trait::async_trait]
pub trait Probe: Send {
    /// Value produced by `measure()`.
    type Raw: Send;

    /// Value produced by `process()` and kept as the last measurement.
    type Output: Clone + Send + Sync;

    /// Name used in logs and scheduler errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Measure a new raw value from the source.
    ///
    /// Source failures (I/O, spawn, network) propagate to the caller.
    async fn measure(&mut self) -> Result<Self::Raw, ProbeError>;

    /// Turn a raw measurement into the value to report.
    fn process(&mut self, raw: Self::Raw) -> Result<Self::Output, ProbeError>;

    /// Report a processed value to the reporting system.
    async fn report(&mut self, output: &Self::Output) -> Result<(), ProbeError> {
        let _ = output;
        Ok(())
    }

    /// Storage for the last processed value.
    fn slot(&self) -> &Measured<Self::Output>;

    /// Mutable storage for the last processed value.
    fn slot_mut(&mut self) -> &mut Measured<Self::Output>;

    /// The last measured & processed value, `None` before the first run.
    fn measured(&self) -> Option<&Self::Output> {
        self.slot().get()
    }
}

/// Object-safe handle used to run probes of different types together.
///
/// Every [`Probe`] is `Runnable`. Types that only need to be driven on a
/// schedule may implement it directly.
#[async_trait::async_trait]
pub trait Runnable: Send {
    /// Label used in logs and scheduler errors.
    fn label(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Perform one measure/process/report cycle.
    async fn run(&mut self) -> Result<(), ProbeError>;
}

#[async_trait::async_trait]
impl<P: Probe> Runnable for P {
    fn label(&self) -> &str {
        self.name()
    }

    async fn run(&mut self) -> Result<(), ProbeError> {
        let raw = self.measure().await?;
        let output = self.process(raw)?;
        self.slot_mut().store(output.clone());
        self.report(&output).await
    }
}

/// Implement [`Probe::process`] as the identity, for probes whose raw
/// measurement is already the value to report.
///
/// ```
/// use pimetrics::{Measured, Probe, ProbeError};
///
/// struct Uptime {
///     last: Measured<String>,
/// }
///
/// #[async_trait::async_trait]
/// impl Probe for Uptime {
///     type Raw = String;
///     type Output = String;
///
///     async fn measure(&mut self) -> Result<String, ProbeError> {
///         Ok(tokio::fs::read_to_string("/proc/uptime").await?)
///     }
///
///     pimetrics::identity_process!();
///
///     fn slot(&self) -> &Measured<String> {
///         &self.last
///     }
///
///     fn slot_mut(&mut self) -> &mut Measured<String> {
///         &mut self.last
///     }
/// }
/// ```
#[macro_export]
macro_rules! identity_process {
    () => {
        fn process(
            &mut self,
            raw: Self::Raw,
        ) -> ::std::result::Result<Self::Output, $crate::probe::ProbeError> {
            Ok(raw)
        }
    };
}

/// Collapse the terminal status of a child process for error messages.
pub(crate) fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "status unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cycles through a fixed sequence of values.
    struct SequenceProbe {
        values: Vec<i32>,
        index: usize,
        last: Measured<i32>,
    }

    impl SequenceProbe {
        fn new(values: Vec<i32>) -> Self {
            Self {
                values,
                index: 0,
                last: Measured::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Probe for SequenceProbe {
        type Raw = i32;
        type Output = i32;

        async fn measure(&mut self) -> Result<i32, ProbeError> {
            let value = self.values[self.index];
            self.index = (self.index + 1) % self.values.len();
            Ok(value)
        }

        crate::identity_process!();

        fn slot(&self) -> &Measured<i32> {
            &self.last
        }

        fn slot_mut(&mut self) -> &mut Measured<i32> {
            &mut self.last
        }
    }

    /// Doubles values and fails on negative input.
    struct DoublingProbe {
        next: i32,
        reported: Vec<i32>,
        last: Measured<i32>,
    }

    #[async_trait::async_trait]
    impl Probe for DoublingProbe {
        type Raw = i32;
        type Output = i32;

        fn name(&self) -> &str {
            "doubling"
        }

        async fn measure(&mut self) -> Result<i32, ProbeError> {
            Ok(self.next)
        }

        fn process(&mut self, raw: i32) -> Result<i32, ProbeError> {
            if raw < 0 {
                return Err(ProbeError::Parse(format!("negative value {raw}")));
            }
            Ok(raw * 2)
        }

        async fn report(&mut self, output: &i32) -> Result<(), ProbeError> {
            self.reported.push(*output);
            Ok(())
        }

        fn slot(&self) -> &Measured<i32> {
            &self.last
        }

        fn slot_mut(&mut self) -> &mut Measured<i32> {
            &mut self.last
        }
    }

    #[tokio::test]
    async fn test_run_reports_each_value() {
        let values = vec![1, 2, 3, 4];
        let mut probe = SequenceProbe::new(values.clone());
        assert!(probe.measured().is_none());

        for value in values {
            probe.run().await.unwrap();
            assert_eq!(probe.measured(), Some(&value));
        }
    }

    #[tokio::test]
    async fn test_run_processes_then_reports() {
        let mut probe = DoublingProbe {
            next: 21,
            reported: Vec::new(),
            last: Measured::new(),
        };

        probe.run().await.unwrap();
        assert_eq!(probe.measured(), Some(&42));
        assert_eq!(probe.reported, vec![42]);
        assert_eq!(probe.label(), "doubling");
    }

    #[tokio::test]
    async fn test_process_error_propagates_and_keeps_last_value() {
        let mut probe = DoublingProbe {
            next: 5,
            reported: Vec::new(),
            last: Measured::new(),
        };
        probe.run().await.unwrap();

        probe.next = -1;
        let err = probe.run().await.unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
        assert_eq!(probe.measured(), Some(&10));
        assert_eq!(probe.reported, vec![10]);
    }

    #[test]
    fn test_default_name_is_type_name() {
        let probe = SequenceProbe::new(vec![0]);
        assert!(probe.name().ends_with("SequenceProbe"));
    }
}
