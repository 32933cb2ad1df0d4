//! Groups of probes run together.

use crate::probe::{Probe, ProbeError, Runnable};

/// An ordered collection of probes of the same type run as one unit.
///
/// Useful when several sources share a type and an interval, e.g. the
/// frequency of every CPU core.
#[derive(Debug)]
pub struct ProbeGroup<P> {
    name: String,
    probes: Vec<P>,
}

impl<P: Probe> ProbeGroup<P> {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probes: Vec::new(),
        }
    }

    /// Append `probe`, returning it for further inspection.
    pub fn register(&mut self, probe: P) -> &mut P {
        self.probes.push(probe);
        let last = self.probes.len() - 1;
        &mut self.probes[last]
    }

    /// Last measured value of each probe, in registration order.
    pub fn measured(&self) -> Vec<Option<&P::Output>> {
        self.probes.iter().map(Probe::measured).collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.probes.iter()
    }
}

impl<'a, P> IntoIterator for &'a ProbeGroup<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.probes.iter()
    }
}

#[async_trait::async_trait]
impl<P: Probe> Runnable for ProbeGroup<P> {
    fn label(&self) -> &str {
        &self.name
    }

    /// Run every probe in registration order, stopping at the first error.
    async fn run(&mut self) -> Result<(), ProbeError> {
        for probe in &mut self.probes {
            probe.run().await.inspect_err(|e| {
                tracing::debug!(group = %self.name, probe = %probe.name(), error = %e, "Probe failed");
            })?;
        }
        Ok(())
    }
}
