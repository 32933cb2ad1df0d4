//! Reporting boundary towards a metrics system.
//!
//! A [`Sink`] receives one [`Sample`] per successful probe run. Wrapping a
//! probe in [`Reported`] is all it takes to feed it into a sink.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::probe::{Measured, Probe, ProbeError};

/// Errors raised by sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The receiving side of the sink is gone.
    #[error("sink closed")]
    Closed,
}

/// A reported data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Name of the reporting probe.
    pub name: String,
    /// Reported value.
    pub value: f64,
    /// Static tags attached to the probe.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// When the value was reported.
    pub ts: DateTime<Utc>,
}

impl Sample {
    /// Create a sample stamped with the current time.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
            ts: Utc::now(),
        }
    }

    /// Attach tags.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Destination of reported samples.
pub trait Sink: Send + Sync {
    /// Record one sample.
    fn record(&self, sample: Sample) -> Result<(), SinkError>;
}

/// Sink forwarding samples over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<Sample>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it.
    pub fn channel() -> (Self, UnboundedReceiver<Sample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn record(&self, sample: Sample) -> Result<(), SinkError> {
        self.tx.send(sample).map_err(|_| SinkError::Closed)
    }
}

/// Sink emitting samples as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn record(&self, sample: Sample) -> Result<(), SinkError> {
        tracing::info!(
            name = %sample.name,
            value = sample.value,
            tags = ?sample.tags,
            ts = %sample.ts.to_rfc3339(),
            "Sample"
        );
        Ok(())
    }
}

/// Sink keeping every sample in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded sample, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Recorded values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.samples().iter().map(|s| s.value).collect()
    }
}

impl Sink for MemorySink {
    fn record(&self, sample: Sample) -> Result<(), SinkError> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sample);
        Ok(())
    }
}

/// Probe wrapper recording each processed value into a sink.
///
/// Measurement, processing and the measured slot are delegated to the
/// wrapped probe. After the wrapped probe's own `report()`, the output is
/// converted with `convert` and recorded; `None` values are skipped.
pub struct Reported<P, F> {
    inner: P,
    name: Option<String>,
    tags: BTreeMap<String, String>,
    sink: Arc<dyn Sink>,
    convert: F,
}

impl<P, F> Reported<P, F>
where
    P: Probe,
    F: Fn(&P::Output) -> Option<f64> + Send + Sync,
{
    /// Wrap `inner`, reporting into `sink`.
    pub fn new(inner: P, sink: Arc<dyn Sink>, convert: F) -> Self {
        Self {
            inner,
            name: None,
            tags: BTreeMap::new(),
            sink,
            convert,
        }
    }

    /// Report under `name` instead of the wrapped probe's name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach static tags to every sample.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Wrapped probe.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: std::fmt::Debug, F> std::fmt::Debug for Reported<P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reported")
            .field("inner", &self.inner)
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<P, F> Probe for Reported<P, F>
where
    P: Probe,
    F: Fn(&P::Output) -> Option<f64> + Send + Sync,
{
    type Raw = P::Raw;
    type Output = P::Output;

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.inner.name())
    }

    async fn measure(&mut self) -> Result<P::Raw, ProbeError> {
        self.inner.measure().await
    }

    fn process(&mut self, raw: P::Raw) -> Result<P::Output, ProbeError> {
        self.inner.process(raw)
    }

    async fn report(&mut self, output: &P::Output) -> Result<(), ProbeError> {
        self.inner.report(output).await?;

        let Some(value) = (self.convert)(output) else {
            tracing::debug!(name = %self.name(), "No value to report");
            return Ok(());
        };
        let sample = Sample::new(self.name(), value).with_tags(self.tags.clone());
        self.sink.record(sample)?;
        Ok(())
    }

    fn slot(&self) -> &Measured<P::Output> {
        self.inner.slot()
    }

    fn slot_mut(&mut self) -> &mut Measured<P::Output> {
        self.inner.slot_mut()
    }
}
