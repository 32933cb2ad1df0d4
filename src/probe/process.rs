//! Probes fed by the output of a long-running process.
//!
//! - [`ProcessProbe`]: returns the lines produced since the previous run
//! - [`NumericProcessProbe`]: folds those lines into a single number
//!
//! Typical example: report latency measured by a `ping` process.

use std::ffi::OsStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::process::Command;
use tokio::time::Instant;

use crate::probe::traits::describe_status;
use crate::probe::{Measured, Probe, ProbeError};
use crate::reader::BackgroundLineReader;

/// Default delay between two drains while waiting for output (10 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Measures the output of a spawned process.
///
/// The process is started at construction and its stdout is drained by a
/// [`BackgroundLineReader`]. Each measurement returns the lines produced
/// since the previous one; interpreting them is left to wrapping probes.
#[derive(Debug)]
pub struct ProcessProbe {
    reader: BackgroundLineReader,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    last: Measured<Vec<String>>,
}

impl ProcessProbe {
    /// Spawn `program` with `args`.
    ///
    /// # Errors
    /// Returns `ProbeError::ExecutableNotFound` if `program` cannot be launched.
    pub fn new<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::from_command(command)
    }

    /// Split `command_line` with shell quoting rules and spawn the first
    /// word with the rest as arguments. No shell is involved, so pipes and
    /// redirections are passed through literally.
    ///
    /// # Errors
    /// Returns `ProbeError::Config` for an empty or unbalanced command line,
    /// and `ProbeError::ExecutableNotFound` if the program cannot be launched.
    pub fn from_command_line(command_line: impl AsRef<str>) -> Result<Self, ProbeError> {
        let command_line = command_line.as_ref();
        let words = shlex::split(command_line)
            .ok_or_else(|| ProbeError::Config(format!("unbalanced quoting in '{command_line}'")))?;
        let (program, args) = words
            .split_first()
            .ok_or_else(|| ProbeError::Config("command line is empty".to_string()))?;
        Self::new(program, args)
    }

    /// Spawn `command_line` through `sh -c`.
    ///
    /// A missing program inside the script is not detected here: the shell
    /// starts fine and the script fails later.
    ///
    /// # Errors
    /// Returns `ProbeError::ExecutableNotFound` if no shell is available.
    pub fn shell(command_line: impl AsRef<str>) -> Result<Self, ProbeError> {
        Self::new("sh", ["-c", command_line.as_ref()])
    }

    /// Spawn a fully prepared command.
    pub fn from_command(command: Command) -> Result<Self, ProbeError> {
        Ok(Self {
            reader: BackgroundLineReader::spawn(command)?,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
            last: Measured::new(),
        })
    }

    /// Set the delay between drains while waiting for output.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound how long a measurement waits for output.
    ///
    /// When the bound expires the measurement returns an empty batch.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Whether the process is alive or still has unread output.
    ///
    /// Once this returns false the probe should be recreated.
    pub fn running(&self) -> bool {
        self.reader.running()
    }

    /// Command line of the spawned process.
    pub fn command(&self) -> &str {
        self.reader.command()
    }

    /// Wait until at least one line is available or the process is done.
    async fn collect(&mut self) -> Result<Vec<String>, ProbeError> {
        if !self.reader.running() {
            let status = self.reader.try_wait().ok().flatten();
            return Err(ProbeError::ProcessExited {
                command: self.reader.command().to_string(),
                status: describe_status(status),
            });
        }

        let deadline = self.max_wait.map(|wait| Instant::now() + wait);
        loop {
            let lines = self.reader.read();
            if !lines.is_empty() || !self.reader.running() {
                return Ok(lines);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::debug!(command = %self.reader.command(), "No process output before deadline");
                return Ok(lines);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait::async_trait]
impl Probe for ProcessProbe {
    type Raw = Vec<String>;
    type Output = Vec<String>;

    fn name(&self) -> &str {
        self.reader.command()
    }

    async fn measure(&mut self) -> Result<Vec<String>, ProbeError> {
        self.collect().await
    }

    crate::identity_process!();

    fn slot(&self) -> &Measured<Vec<String>> {
        &self.last
    }

    fn slot_mut(&mut self) -> &mut Measured<Vec<String>> {
        &mut self.last
    }
}

/// How a batch of numeric lines is folded into one value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LineAggregate {
    /// Sum of all values (0 for an empty batch).
    #[default]
    Sum,
    /// Arithmetic mean (none for an empty batch).
    Mean,
    /// Most recent value (none for an empty batch).
    Last,
    /// Number of numeric lines.
    Count,
}

impl LineAggregate {
    /// Fold `values` according to this aggregate.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        match self {
            Self::Sum => Some(values.iter().sum()),
            Self::Count => Some(values.len() as f64),
            Self::Last => values.last().copied(),
            Self::Mean if values.is_empty() => None,
            Self::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        }
    }
}

/// Interprets process output as numbers and folds each batch.
///
/// An empty batch yields `None` whatever the aggregate. With a pattern, the first capture group (or the whole match) of each line
/// is parsed; without one the trimmed line is. Lines that do not yield a
/// number are skipped.
#[derive(Debug)]
pub struct NumericProcessProbe {
    inner: ProcessProbe,
    pattern: Option<Regex>,
    aggregate: LineAggregate,
    last: Measured<Option<f64>>,
}

impl NumericProcessProbe {
    /// Wrap a process probe.
    pub fn new(inner: ProcessProbe, aggregate: LineAggregate) -> Self {
        Self {
            inner,
            pattern: None,
            aggregate,
            last: Measured::new(),
        }
    }

    /// Extract numbers with `pattern` instead of parsing whole lines.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Whether the underlying process still has output to observe.
    pub fn running(&self) -> bool {
        self.inner.running()
    }

    fn extract(&self, line: &str) -> Option<f64> {
        let text = match &self.pattern {
            Some(pattern) => {
                let caps = pattern.captures(line)?;
                caps.get(1).or_else(|| caps.get(0))?.as_str()
            }
            None => line,
        };
        text.trim().parse().ok()
    }
}

#[async_trait::async_trait]
impl Probe for NumericProcessProbe {
    type Raw = Vec<String>;
    type Output = Option<f64>;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn measure(&mut self) -> Result<Vec<String>, ProbeError> {
        self.inner.measure().await
    }

    fn process(&mut self, raw: Vec<String>) -> Result<Option<f64>, ProbeError> {
        // Reader stopped or max_wait expired: nothing was measured.
        if raw.is_empty() {
            return Ok(None);
        }
        let values: Vec<f64> = raw.iter().filter_map(|line| self.extract(line)).collect();
        Ok(self.aggregate.apply(&values))
    }

    fn slot(&self) -> &Measured<Option<f64>> {
        &self.last
    }

    fn slot_mut(&mut self) -> &mut Measured<Option<f64>> {
        &mut self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Runnable;

    const COUNT_TO_TEN: &str = "for i in 1 2 3 4 5 6 7 8 9 10; do echo $i; sleep 0.02; done";

    /// Sums the integer lines of each batch.
    struct SumProbe {
        inner: ProcessProbe,
        last: Measured<i64>,
    }

    #[async_trait::async_trait]
    impl Probe for SumProbe {
        type Raw = Vec<String>;
        type Output = i64;

        async fn measure(&mut self) -> Result<Vec<String>, ProbeError> {
            self.inner.measure().await
        }

        fn process(&mut self, lines: Vec<String>) -> Result<i64, ProbeError> {
            lines
                .iter()
                .map(|line| {
                    line.trim()
                        .parse::<i64>()
                        .map_err(|e| ProbeError::Parse(e.to_string()))
                })
                .sum()
        }

        fn slot(&self) -> &Measured<i64> {
            &self.last
        }

        fn slot_mut(&mut self) -> &mut Measured<i64> {
            &mut self.last
        }
    }

    #[tokio::test]
    async fn test_process_probe_sums_all_output() {
        let mut probe = SumProbe {
            inner: ProcessProbe::shell(COUNT_TO_TEN).unwrap(),
            last: Measured::new(),
        };

        let mut out = 0;
        while probe.inner.running() {
            probe.run().await.unwrap();
            out += probe.measured().copied().unwrap();
        }
        assert_eq!(out, 55);
    }

    #[tokio::test]
    async fn test_process_probe_missing_executable() {
        let err = ProcessProbe::new("missing_process_ut.sh", Vec::<&str>::new()).unwrap_err();
        assert!(matches!(err, ProbeError::ExecutableNotFound(_)));
    }

    #[tokio::test]
    async fn test_command_line_missing_executable() {
        let err = ProcessProbe::from_command_line("missing_process_ut.sh --flag").unwrap_err();
        assert!(matches!(err, ProbeError::ExecutableNotFound(ref cmd) if cmd.starts_with("missing_process_ut.sh")));
    }

    #[tokio::test]
    async fn test_command_line_rejects_bad_input() {
        assert!(matches!(ProcessProbe::from_command_line("   "), Err(ProbeError::Config(_))));
        assert!(matches!(ProcessProbe::from_command_line("echo 'open"), Err(ProbeError::Config(_))));
    }

    #[tokio::test]
    async fn test_command_line_keeps_quoted_arguments() {
        let mut probe = ProcessProbe::from_command_line("printf '%s\\n' 'a b' c").unwrap();
        assert_eq!(probe.command(), "printf %s\\n a b c");

        let mut lines = Vec::new();
        while probe.running() {
            probe.run().await.unwrap();
            lines.extend(probe.measured().cloned().unwrap_or_default());
        }
        assert_eq!(lines, vec!["a b", "c"]);
    }

    #[tokio::test]
    async fn test_process_probe_waits_for_output() {
        let mut probe = ProcessProbe::shell("sleep 0.2; echo ready; sleep 1").unwrap();

        probe.run().await.unwrap();
        assert_eq!(probe.measured(), Some(&vec!["ready".to_string()]));
    }

    #[tokio::test]
    async fn test_process_probe_max_wait_returns_empty_batch() {
        let mut probe = ProcessProbe::shell("sleep 5")
            .unwrap()
            .with_max_wait(Duration::from_millis(50));

        probe.run().await.unwrap();
        assert_eq!(probe.measured(), Some(&Vec::new()));
        assert!(probe.running());
    }

    #[tokio::test]
    async fn test_process_probe_errors_after_exit() {
        let mut probe = ProcessProbe::shell("echo done").unwrap();
        while probe.running() {
            probe.run().await.unwrap();
        }

        let err = probe.run().await.unwrap_err();
        assert!(matches!(err, ProbeError::ProcessExited { .. }));
        assert!(err.to_string().contains("echo done"));
    }

    #[tokio::test]
    async fn test_numeric_probe_sum() {
        let mut probe =
            NumericProcessProbe::new(ProcessProbe::shell(COUNT_TO_TEN).unwrap(), LineAggregate::Sum);

        let mut out = 0.0;
        while probe.running() {
            probe.run().await.unwrap();
            out += probe.measured().copied().flatten().unwrap_or(0.0);
        }
        assert_eq!(out, 55.0);
    }

    #[tokio::test]
    async fn test_numeric_probe_pattern_skips_other_lines() {
        let script = "echo 'PING host'; echo 'time=10.5 ms'; echo 'garbage'; echo 'time=20.0 ms'";
        let mut probe =
            NumericProcessProbe::new(ProcessProbe::shell(script).unwrap(), LineAggregate::Sum)
                .with_pattern(Regex::new(r"time=([0-9.]+)").unwrap());

        // Lines may arrive across several drains.
        let mut out = 0.0;
        while probe.running() {
            probe.run().await.unwrap();
            out += probe.measured().copied().flatten().unwrap_or(0.0);
        }
        assert_eq!(out, 30.5);
    }

    #[tokio::test]
    async fn test_numeric_probe_empty_batch_is_not_reported() {
        use crate::sink::{MemorySink, Reported};
        use std::sync::Arc;

        let sink = MemorySink::new();
        for aggregate in [LineAggregate::Sum, LineAggregate::Count] {
            let numeric = NumericProcessProbe::new(
                ProcessProbe::shell("sleep 5").unwrap().with_max_wait(Duration::from_millis(50)),
                aggregate,
            );
            let mut probe =
                Reported::new(numeric, Arc::new(sink.clone()), |value: &Option<f64>| *value);
            probe.run().await.unwrap();
            assert_eq!(probe.measured(), Some(&None));
        }
        assert!(sink.samples().is_empty());
    }

    #[tokio::test]
    async fn test_numeric_probe_exhausted_output_yields_none() {
        let mut probe =
            NumericProcessProbe::new(ProcessProbe::shell("true").unwrap(), LineAggregate::Count);

        probe.run().await.unwrap();
        assert_eq!(probe.measured(), Some(&None));
    }

    #[test]
    fn test_line_aggregate_apply() {
        let values = [1.0, 2.0, 6.0];
        assert_eq!(LineAggregate::Sum.apply(&values), Some(9.0));
        assert_eq!(LineAggregate::Mean.apply(&values), Some(3.0));
        assert_eq!(LineAggregate::Last.apply(&values), Some(6.0));
        assert_eq!(LineAggregate::Count.apply(&values), Some(3.0));

        assert_eq!(LineAggregate::Sum.apply(&[]), Some(0.0));
        assert_eq!(LineAggregate::Count.apply(&[]), Some(0.0));
        assert_eq!(LineAggregate::Mean.apply(&[]), None);
        assert_eq!(LineAggregate::Last.apply(&[]), None);
    }

    #[test]
    fn test_line_aggregate_from_str() {
        use std::str::FromStr;
        assert_eq!(LineAggregate::from_str("sum").unwrap(), LineAggregate::Sum);
        assert_eq!(LineAggregate::from_str("MEAN").unwrap(), LineAggregate::Mean);
        assert!(LineAggregate::from_str("median").is_err());
        assert_eq!(LineAggregate::Last.as_ref(), "last");
    }
}
