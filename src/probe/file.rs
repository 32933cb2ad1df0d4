//! File-based probes.
//!
//! - [`FileProbe`]: reads the full content of a file on every run
//! - [`DividedFileProbe`]: reads a single numeric value (e.g. from `/sys`)
//!   and divides it for unit conversion

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::probe::{Measured, Probe, ProbeError};

/// Default divisor: report the value as read.
pub const DEFAULT_DIVISOR: f64 = 1.0;

/// Open and release `path`, failing fast if it cannot be read.
fn check_readable(path: &Path) -> Result<(), ProbeError> {
    match File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ProbeError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(ProbeError::Io(e)),
    }
}

/// Measures the full text content of a file.
///
/// The file is re-read completely on every measurement, so a growing file
/// reports its cumulative content.
#[derive(Debug)]
pub struct FileProbe {
    path: PathBuf,
    last: Measured<String>,
}

impl FileProbe {
    /// Create a probe for `path`.
    ///
    /// # Errors
    /// Returns `ProbeError::FileNotFound` if the file does not exist at
    /// construction time.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let path = path.as_ref().to_path_buf();
        check_readable(&path)?;
        Ok(Self {
            path,
            last: Measured::new(),
        })
    }

    /// Path of the measured file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<String, ProbeError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProbeError::FileNotFound(self.path.clone())
            } else {
                ProbeError::Io(e)
            }
        })
    }
}

#[async_trait::async_trait]
impl Probe for FileProbe {
    type Raw = String;
    type Output = String;

    async fn measure(&mut self) -> Result<String, ProbeError> {
        self.read().await
    }

    crate::identity_process!();

    fn slot(&self) -> &Measured<String> {
        &self.last
    }

    fn slot_mut(&mut self) -> &mut Measured<String> {
        &mut self.last
    }
}

/// Measures a single numeric value from a file and divides it.
///
/// Typical use is `/sys` attributes reported in units too small for display,
/// e.g. a clock frequency in kHz divided by 1000 to report MHz.
#[derive(Debug)]
pub struct DividedFileProbe {
    file: FileProbe,
    divisor: f64,
    last: Measured<f64>,
}

impl DividedFileProbe {
    /// Create a probe for `path` reporting the value as read.
    ///
    /// # Errors
    /// Returns `ProbeError::FileNotFound` if the file does not exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        Self::with_divisor(path, DEFAULT_DIVISOR)
    }

    /// Create a probe for `path` dividing every measurement by `divisor`.
    ///
    /// # Errors
    /// Returns `ProbeError::Config` if `divisor` is not a positive finite
    /// number, or `ProbeError::FileNotFound` if the file does not exist.
    pub fn with_divisor(path: impl AsRef<Path>, divisor: f64) -> Result<Self, ProbeError> {
        if !divisor.is_finite() || divisor <= 0.0 {
            return Err(ProbeError::Config(format!(
                "divisor must be a positive number, got {divisor}"
            )));
        }
        Ok(Self {
            file: FileProbe::new(path)?,
            divisor,
            last: Measured::new(),
        })
    }

    /// Path of the measured file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Configured divisor.
    pub fn divisor(&self) -> f64 {
        self.divisor
    }
}

#[async_trait::async_trait]
impl Probe for DividedFileProbe {
    type Raw = String;
    type Output = f64;

    async fn measure(&mut self) -> Result<String, ProbeError> {
        self.file.read().await
    }

    fn process(&mut self, raw: String) -> Result<f64, ProbeError> {
        let value: f64 = raw.trim().parse().map_err(|e| {
            ProbeError::Parse(format!(
                "'{}' in {}: {}",
                raw.trim(),
                self.file.path.display(),
                e
            ))
        })?;
        Ok(value / self.divisor)
    }

    fn slot(&self) -> &Measured<f64> {
        &self.last
    }

    fn slot_mut(&mut self) -> &mut Measured<f64> {
        &mut self.last
    }
}
