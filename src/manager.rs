//! Seams towards the surrounding project: external series sources and the
//! location of condition files.
//!
//! External file formats are not implemented here. The container drives a
//! [`SeriesManager`] implementation through `adjust_series`, so any format
//! that can produce a time grid plus an array can feed the simulation.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;

use crate::errors::{SequenceError, SequenceResult};
use crate::timegrid::Timegrid;
use crate::value::FloatValue;

/// Source and sink for externally stored time series.
///
/// `load_series` returns the grid the data is defined on together with the
/// values, shape `(steps,) + sequence shape`; alignment with the simulation
/// period is the caller's job.
pub trait SeriesManager {
    /// Base directory of the external series files.
    fn directory(&self) -> &Path;

    /// Whether existing external files may be overwritten on save.
    fn overwrite(&self) -> bool;

    fn load_series(
        &self,
        device: &str,
        group: &str,
        name: &str,
    ) -> SequenceResult<(Timegrid, ArrayD<FloatValue>)>;

    fn save_series(
        &mut self,
        device: &str,
        group: &str,
        name: &str,
        grid: &Timegrid,
        values: &ArrayD<FloatValue>,
    ) -> SequenceResult<()>;
}

/// Directory holding the condition files of one project.
#[derive(Debug, Clone)]
pub struct ConditionPaths {
    dir: PathBuf,
}

impl ConditionPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The condition file for one device.
    ///
    /// An explicit file name wins; otherwise the name is derived from the
    /// device. Fails with [`SequenceError::DeviceNameUnknown`] when neither
    /// is available.
    pub fn filepath(
        &self,
        device: Option<&str>,
        filename: Option<&str>,
    ) -> SequenceResult<PathBuf> {
        let name = match (filename, device) {
            (Some(filename), _) => {
                if filename.ends_with(".toml") {
                    filename.to_string()
                } else {
                    format!("{filename}.toml")
                }
            }
            (None, Some(device)) => format!("{device}.toml"),
            (None, None) => return Err(SequenceError::DeviceNameUnknown),
        };
        Ok(self.dir.join(name))
    }
}
