//! Time-series capability of a sequence: value access, the RAM/disk
//! storage-mode state machine, completeness validation, external-data
//! alignment and weighted aggregation.
//!
//! Storage modes form the state machine {inactive, ram, disk}. Activating one
//! mode while the other is active migrates the persisted data instead of
//! dropping it; a disk-mode sequence's file exists exactly as long as
//! `diskflag` is true.

use std::path::{Path, PathBuf};

use log::debug;
use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::errors::{SequenceError, SequenceResult};
use crate::fastaccess::{read_array, write_array};
use crate::group::SequenceView;
use crate::options::Options;
use crate::sequence::{Aggregation, NumericBuffers};
use crate::timegrid::Timegrid;
use crate::value::{FloatValue, ValueInput, MISSING};

impl SequenceView<'_> {
    /// The current value; fails until the first assignment.
    pub fn value(&self) -> SequenceResult<&ArrayD<FloatValue>> {
        self.slot.value.get(&self.full_name())
    }

    /// The current value as a scalar; 0-dimensional sequences only.
    pub fn scalar(&self) -> SequenceResult<FloatValue> {
        self.slot.value.scalar(&self.full_name())
    }

    /// Assign a new value, coercing shape and type.
    pub fn set_value(&mut self, input: impl Into<ValueInput>) -> SequenceResult<()> {
        self.require_shape()?;
        let name = self.full_name();
        self.slot.value.set(&name, &input.into())
    }

    pub fn shape(&self) -> &[usize] {
        &self.slot.lengths
    }

    /// Reallocate storage for a new shape.
    ///
    /// The current value is reset to the initial fill; states reallocate
    /// their old buffer, numeric sequences their integration buffers, and an
    /// active series store is reallocated in place, preserving its mode.
    pub fn set_shape(&mut self, shape: &[usize]) -> SequenceResult<()> {
        if shape.len() != self.seq.ndim {
            return Err(SequenceError::DimensionMismatch {
                name: self.full_name(),
                ndim: self.seq.ndim,
                got: shape.to_vec(),
            });
        }
        self.slot.lengths = shape.to_vec();
        self.slot.value.reshape(shape, self.seq.initial);
        if self.seq.old.is_some() {
            self.seq.old = Some(ArrayD::from_elem(IxDyn(shape), self.seq.initial));
        }
        if self.seq.numeric {
            self.seq.buffers = Some(NumericBuffers::new(shape));
        }
        if self.slot.ramflag {
            self.slot.ram = Some(ArrayD::from_elem(IxDyn(&self.slot.series_shape()), MISSING));
        } else if self.slot.diskflag {
            let placeholder = ArrayD::from_elem(IxDyn(&self.slot.series_shape()), MISSING);
            let path = self.require_path()?;
            write_array(&path, &placeholder)?;
        }
        Ok(())
    }

    pub fn ramflag(&self) -> bool {
        self.slot.ramflag
    }

    pub fn diskflag(&self) -> bool {
        self.slot.diskflag
    }

    pub fn memoryflag(&self) -> bool {
        self.slot.memoryflag()
    }

    fn require_shape(&self) -> SequenceResult<()> {
        if self.seq.ndim > 0 && self.slot.lengths.contains(&0) {
            return Err(SequenceError::ShapeNotSet(self.full_name()));
        }
        Ok(())
    }

    fn require_path(&self) -> SequenceResult<PathBuf> {
        self.slot
            .path
            .clone()
            .ok_or_else(|| SequenceError::StorageNotActive(self.full_name()))
    }

    fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.bin",
            self.device,
            self.seq.kind().group_name(),
            self.seq.name()
        )
    }

    /// Switch to RAM mode, migrating persisted data from disk if necessary.
    pub fn activate_ram(&mut self, grid: &Timegrid) -> SequenceResult<()> {
        if self.slot.ramflag {
            return Ok(());
        }
        if self.slot.diskflag {
            return self.disk2ram();
        }
        self.require_shape()?;
        self.slot.steps = grid.len();
        self.slot.ram = Some(ArrayD::from_elem(IxDyn(&self.slot.series_shape()), MISSING));
        self.slot.ramflag = true;
        Ok(())
    }

    /// Switch to disk mode, migrating the RAM array to a file if necessary.
    pub fn activate_disk(&mut self, grid: &Timegrid, dir: &Path) -> SequenceResult<()> {
        if self.slot.diskflag {
            return Ok(());
        }
        if self.slot.ramflag {
            return self.ram2disk(dir);
        }
        self.require_shape()?;
        self.slot.steps = grid.len();
        let path = dir.join(self.file_name());
        let placeholder = ArrayD::from_elem(IxDyn(&self.slot.series_shape()), MISSING);
        write_array(&path, &placeholder)?;
        self.slot.path = Some(path);
        self.slot.diskflag = true;
        Ok(())
    }

    /// Drop the RAM array and return to the inactive state.
    pub fn deactivate_ram(&mut self) {
        if self.slot.ramflag {
            self.slot.ram = None;
            self.slot.ramflag = false;
            self.slot.steps = 0;
        }
    }

    /// Delete the series file and return to the inactive state.
    pub fn deactivate_disk(&mut self) -> SequenceResult<()> {
        if self.slot.diskflag {
            self.slot.file = None;
            if let Some(path) = self.slot.path.take() {
                std::fs::remove_file(path)?;
            }
            self.slot.diskflag = false;
            self.slot.steps = 0;
        }
        Ok(())
    }

    /// Migrate the RAM array into a freshly written series file.
    pub fn ram2disk(&mut self, dir: &Path) -> SequenceResult<()> {
        let ram = self
            .slot
            .ram
            .take()
            .ok_or_else(|| SequenceError::StorageNotActive(self.full_name()))?;
        let path = dir.join(self.file_name());
        write_array(&path, &ram)?;
        debug!("migrated series of `{}` from RAM to disk", self.full_name());
        self.slot.path = Some(path);
        self.slot.ramflag = false;
        self.slot.diskflag = true;
        Ok(())
    }

    /// Read the series file into RAM and delete it.
    pub fn disk2ram(&mut self) -> SequenceResult<()> {
        let path = self.require_path()?;
        let values = read_array(&path, &self.slot.series_shape())?;
        self.slot.file = None;
        std::fs::remove_file(&path)?;
        debug!("migrated series of `{}` from disk to RAM", self.full_name());
        self.slot.path = None;
        self.slot.diskflag = false;
        self.slot.ram = Some(values);
        self.slot.ramflag = true;
        Ok(())
    }

    /// The whole time axis of the series, shape `(steps,) + shape`.
    pub fn series(&self) -> SequenceResult<ArrayD<FloatValue>> {
        if self.slot.ramflag {
            Ok(self
                .slot
                .ram
                .as_ref()
                .expect("RAM array present while ramflag is set")
                .clone())
        } else if self.slot.diskflag {
            read_array(&self.require_path()?, &self.slot.series_shape())
        } else {
            Err(SequenceError::StorageNotActive(self.full_name()))
        }
    }

    /// Replace the whole time axis, then check completeness.
    pub fn set_series(&mut self, values: ArrayD<FloatValue>, options: &Options) -> SequenceResult<()> {
        let expected = self.slot.series_shape();
        if values.shape() != expected.as_slice() {
            return Err(SequenceError::ShapeMismatch {
                name: self.full_name(),
                expected,
                got: values.shape().to_vec(),
            });
        }
        if self.slot.ramflag {
            self.slot.ram = Some(values);
        } else if self.slot.diskflag {
            write_array(&self.require_path()?, &values)?;
        } else {
            return Err(SequenceError::StorageNotActive(self.full_name()));
        }
        self.check_completeness(options)
    }

    /// Under strict checking, fail when the series holds missing values.
    pub fn check_completeness(&self, options: &Options) -> SequenceResult<()> {
        if !options.check_series {
            return Ok(());
        }
        let count = self.series()?.iter().filter(|v| v.is_nan()).count();
        if count > 0 {
            return Err(SequenceError::IncompleteSeries {
                name: self.full_name(),
                count,
            });
        }
        Ok(())
    }

    /// Align externally loaded data with the simulation period.
    ///
    /// Returns the exact slice when the external grid covers the whole
    /// period. Shorter coverage is an error under strict checking and is
    /// padded via [`Self::adjust_short_series`] otherwise.
    pub fn adjust_series(
        &self,
        sim: &Timegrid,
        external: &Timegrid,
        values: &ArrayD<FloatValue>,
        options: &Options,
    ) -> SequenceResult<ArrayD<FloatValue>> {
        if !sim.step_matches(external) {
            return Err(SequenceError::StepSizeMismatch {
                name: self.full_name(),
                simulation: sim.step(),
                external: external.step(),
            });
        }
        if values.ndim() == 0 || values.shape()[0] != external.len() {
            let mut expected = vec![external.len()];
            expected.extend_from_slice(&self.slot.lengths);
            return Err(SequenceError::ShapeMismatch {
                name: self.full_name(),
                expected,
                got: values.shape().to_vec(),
            });
        }
        if sim.covered_by(external) {
            let offset = external.offset_of(sim.start());
            debug_assert!(offset >= 0);
            let start = offset as usize;
            return Ok(values
                .slice_axis(
                    Axis(0),
                    Slice::new(start as isize, Some((start + sim.len()) as isize), 1),
                )
                .to_owned());
        }
        if options.check_series {
            return Err(SequenceError::InsufficientCoverage {
                name: self.full_name(),
                start: sim.start(),
                end: sim.end(),
                external_start: external.start(),
                external_end: external.end(),
            });
        }
        Ok(self.adjust_short_series(sim, external, values, options))
    }

    /// Pad a partially covering external series to the simulation length.
    ///
    /// The output is pre-filled with zero under `use_default_values` and with
    /// the missing marker otherwise; the overlapping portion is copied at the
    /// correct offset, with indices clamped to the valid range on both sides.
    pub fn adjust_short_series(
        &self,
        sim: &Timegrid,
        external: &Timegrid,
        values: &ArrayD<FloatValue>,
        options: &Options,
    ) -> ArrayD<FloatValue> {
        let fill = if options.use_default_values { 0.0 } else { MISSING };
        let mut shape = vec![sim.len()];
        shape.extend_from_slice(&values.shape()[1..]);
        let mut out = ArrayD::from_elem(IxDyn(&shape), fill);

        let offset = sim.offset_of(external.start());
        let src_start = (-offset).max(0) as usize;
        let src_end = (external.len() as i64).min(sim.len() as i64 - offset);
        if src_end > src_start as i64 {
            let src_end = src_end as usize;
            let dst_start = (offset + src_start as i64) as usize;
            let dst_end = (offset + src_end as i64) as usize;
            out.slice_axis_mut(
                Axis(0),
                Slice::new(dst_start as isize, Some(dst_end as isize), 1),
            )
            .assign(&values.slice_axis(
                Axis(0),
                Slice::new(src_start as isize, Some(src_end as isize), 1),
            ));
        }
        out
    }

    /// Reduce the series to one value per step by weighted averaging.
    ///
    /// 0-dimensional sequences hand out the series unchanged. Otherwise the
    /// per-unit weights (flattened across all non-time axes) are restricted
    /// by the mask, normalised to sum to one, and summed per step. When the
    /// mask selects no unit at all, the result is all missing markers.
    pub fn average_series(
        &self,
        weights: &[FloatValue],
        mask: &[bool],
    ) -> SequenceResult<ArrayD<FloatValue>> {
        let series = self.series()?;
        if self.seq.ndim == 0 {
            return Ok(series);
        }
        let record_len = self.slot.record_len();
        if weights.len() != record_len || mask.len() != record_len {
            return Err(SequenceError::ShapeMismatch {
                name: self.full_name(),
                expected: vec![record_len],
                got: vec![weights.len().max(mask.len())],
            });
        }
        let steps = series.shape()[0];
        let total: FloatValue = weights
            .iter()
            .zip(mask)
            .filter(|(_, selected)| **selected)
            .map(|(weight, _)| *weight)
            .sum();
        if !mask.iter().any(|selected| *selected) {
            return Ok(ArrayD::from_elem(IxDyn(&[steps]), MISSING));
        }
        let mut out = ArrayD::zeros(IxDyn(&[steps]));
        for step in 0..steps {
            let record = series.index_axis(Axis(0), step);
            let mut acc = 0.0;
            for (position, value) in record.iter().enumerate() {
                if mask[position] {
                    acc += value * weights[position] / total;
                }
            }
            out[IxDyn(&[step])] = acc;
        }
        Ok(out)
    }

    /// Reduce the series according to the sequence's configured mode.
    pub fn aggregate_series(
        &self,
        weights: &[FloatValue],
        mask: &[bool],
    ) -> SequenceResult<ArrayD<FloatValue>> {
        match self.seq.aggregation {
            Aggregation::None => self.series(),
            Aggregation::Mean => self.average_series(weights, mask),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::SubSequenceGroup;
    use crate::sequence::{SequenceDef, SequenceKind};
    use ndarray::array;
    use tempfile::tempdir;

    fn input_group() -> SubSequenceGroup {
        let mut group = SubSequenceGroup::new(SequenceKind::Input, "dill");
        group.add(SequenceDef::new("p", 0)).unwrap();
        group
            .add(SequenceDef::new("t", 1).with_shape(vec![3]))
            .unwrap();
        group
    }

    fn grid() -> Timegrid {
        Timegrid::new(10.0, 15.0, 1.0).unwrap()
    }

    #[test]
    fn value_access_requires_assignment() {
        let mut group = input_group();
        let mut view = group.get_mut("p").unwrap();
        assert!(matches!(
            view.value().unwrap_err(),
            SequenceError::UninitializedValue(_)
        ));
        view.set_value(2.5).unwrap();
        assert_eq!(view.scalar().unwrap(), 2.5);
    }

    #[test]
    fn series_requires_active_storage() {
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();
        assert!(matches!(
            view.series().unwrap_err(),
            SequenceError::StorageNotActive(_)
        ));
    }

    #[test]
    fn ram_mode_allocates_missing_markers() {
        let mut group = input_group();
        let mut view = group.get_mut("t").unwrap();
        view.activate_ram(&grid()).unwrap();
        let series = view.series().unwrap();
        assert_eq!(series.shape(), &[5, 3]);
        assert!(series.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn shape_must_be_set_before_activation() {
        let mut group = SubSequenceGroup::new(SequenceKind::Input, "dill");
        group.add(SequenceDef::new("t", 1)).unwrap();
        let mut view = group.get_mut("t").unwrap();
        assert!(matches!(
            view.activate_ram(&grid()).unwrap_err(),
            SequenceError::ShapeNotSet(_)
        ));
        view.set_shape(&[2]).unwrap();
        view.activate_ram(&grid()).unwrap();
    }

    #[test]
    fn ram_disk_ram_round_trip() {
        let dir = tempdir().unwrap();
        let options = Options {
            check_series: false,
            ..Options::default()
        };
        let mut group = input_group();
        let mut view = group.get_mut("t").unwrap();
        view.activate_ram(&grid()).unwrap();

        let values = ArrayD::from_shape_vec(
            IxDyn(&[5, 3]),
            (0..15).map(|v| v as f64).collect(),
        )
        .unwrap();
        view.set_series(values.clone(), &options).unwrap();

        view.activate_disk(&grid(), dir.path()).unwrap();
        assert!(view.diskflag());
        assert!(!view.ramflag());
        view.activate_ram(&grid()).unwrap();
        assert!(view.ramflag());
        assert_eq!(view.series().unwrap(), values);
    }

    #[test]
    fn disk_file_lifecycle_follows_the_flag() {
        let dir = tempdir().unwrap();
        let mut group = input_group();
        let mut view = group.get_mut("p").unwrap();
        view.activate_disk(&grid(), dir.path()).unwrap();
        let path = dir.path().join("dill_inputs_p.bin");
        assert!(path.exists());
        view.deactivate_disk().unwrap();
        assert!(!path.exists());
        assert!(!view.memoryflag());
    }

    #[test]
    fn completeness_check_counts_missing_values() {
        let options = Options::default();
        let mut group = input_group();
        let mut view = group.get_mut("p").unwrap();
        view.activate_ram(&grid()).unwrap();

        let mut values = ArrayD::from_elem(IxDyn(&[5]), 1.0);
        values[IxDyn(&[1])] = f64::NAN;
        values[IxDyn(&[3])] = f64::NAN;
        let err = view.set_series(values, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the series of sequence `dill.inputs.p` contains 2 missing values"
        );

        let mut values = ArrayD::from_elem(IxDyn(&[5]), 1.0);
        values[IxDyn(&[0])] = f64::NAN;
        let err = view.set_series(values, &options).unwrap_err();
        assert!(err.to_string().ends_with("1 missing value"));

        let values = ArrayD::from_elem(IxDyn(&[5]), 1.0);
        view.set_series(values, &options).unwrap();
    }

    #[test]
    fn adjust_series_rejects_step_mismatch() {
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();
        let external = Timegrid::new(10.0, 16.0, 2.0).unwrap();
        let err = view
            .adjust_series(
                &grid(),
                &external,
                &array![1.0, 2.0, 3.0].into_dyn(),
                &Options::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SequenceError::StepSizeMismatch { .. }));
    }

    #[test]
    fn adjust_series_slices_superset_coverage() {
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();
        let external = Timegrid::new(8.0, 16.0, 1.0).unwrap();
        let values = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0].into_dyn();
        let adjusted = view
            .adjust_series(&grid(), &external, &values, &Options::default())
            .unwrap();
        assert_eq!(adjusted, array![2.0, 3.0, 4.0, 5.0, 6.0].into_dyn());
    }

    #[test]
    fn adjust_series_strict_checking_rejects_short_coverage() {
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();
        let external = Timegrid::new(12.0, 15.0, 1.0).unwrap();
        let err = view
            .adjust_series(
                &grid(),
                &external,
                &array![1.0, 1.0, 1.0].into_dyn(),
                &Options::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SequenceError::InsufficientCoverage { .. }));
    }

    #[test]
    fn adjust_short_series_pads_with_missing_markers() {
        let mut options = Options::default();
        options.check_series = false;
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();

        let external = Timegrid::new(12.0, 15.0, 1.0).unwrap();
        let adjusted = view
            .adjust_series(
                &grid(),
                &external,
                &array![1.0, 1.0, 1.0].into_dyn(),
                &options,
            )
            .unwrap();
        assert!(adjusted[IxDyn(&[0])].is_nan());
        assert!(adjusted[IxDyn(&[1])].is_nan());
        assert_eq!(adjusted[IxDyn(&[2])], 1.0);
        assert_eq!(adjusted[IxDyn(&[3])], 1.0);
        assert_eq!(adjusted[IxDyn(&[4])], 1.0);
    }

    #[test]
    fn adjust_short_series_with_no_overlap_is_all_missing() {
        let mut options = Options::default();
        options.check_series = false;
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();

        let external = Timegrid::new(5.0, 10.0, 1.0).unwrap();
        let values = ArrayD::from_elem(IxDyn(&[5]), 1.0);
        let adjusted = view
            .adjust_series(&grid(), &external, &values, &options)
            .unwrap();
        assert_eq!(adjusted.len(), 5);
        assert!(adjusted.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn adjust_short_series_uses_defaults_when_requested() {
        let mut options = Options::default();
        options.check_series = false;
        options.use_default_values = true;
        let mut group = input_group();
        let view = group.get_mut("p").unwrap();

        let external = Timegrid::new(12.0, 15.0, 1.0).unwrap();
        let adjusted = view
            .adjust_series(
                &grid(),
                &external,
                &array![1.0, 1.0, 1.0].into_dyn(),
                &options,
            )
            .unwrap();
        assert_eq!(adjusted, array![0.0, 0.0, 1.0, 1.0, 1.0].into_dyn());
    }

    #[test]
    fn average_series_of_scalar_sequence_is_identity() {
        let options = Options {
            check_series: false,
            ..Options::default()
        };
        let mut group = input_group();
        let mut view = group.get_mut("p").unwrap();
        view.activate_ram(&grid()).unwrap();
        let values = array![1.0, 2.0, 3.0, 4.0, 5.0].into_dyn();
        view.set_series(values.clone(), &options).unwrap();
        assert_eq!(view.average_series(&[], &[]).unwrap(), values);
    }

    #[test]
    fn average_series_applies_masked_normalised_weights() {
        let options = Options {
            check_series: false,
            ..Options::default()
        };
        let mut group = input_group();
        let mut view = group.get_mut("t").unwrap();
        view.activate_ram(&grid()).unwrap();
        let values = ArrayD::from_shape_vec(
            IxDyn(&[5, 3]),
            (0..15).map(|v| v as f64).collect(),
        )
        .unwrap();
        view.set_series(values, &options).unwrap();

        // Unit 2 is masked out; weights 1 and 3 normalise to 0.25 and 0.75.
        let averaged = view
            .average_series(&[1.0, 3.0, 5.0], &[true, true, false])
            .unwrap();
        assert_eq!(averaged.shape(), &[5]);
        // Step 0 record is [0, 1, 2]: 0 * 0.25 + 1 * 0.75 = 0.75.
        assert_eq!(averaged[IxDyn(&[0])], 0.75);
        assert_eq!(averaged[IxDyn(&[1])], 3.75);
    }

    #[test]
    fn average_series_with_empty_mask_yields_missing() {
        let options = Options {
            check_series: false,
            ..Options::default()
        };
        let mut group = input_group();
        let mut view = group.get_mut("t").unwrap();
        view.activate_ram(&grid()).unwrap();
        let values = ArrayD::from_elem(IxDyn(&[5, 3]), 1.0);
        view.set_series(values, &options).unwrap();

        let averaged = view
            .average_series(&[1.0, 1.0, 1.0], &[false, false, false])
            .unwrap();
        assert!(averaged.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn aggregate_series_dispatches_on_mode() {
        let options = Options {
            check_series: false,
            ..Options::default()
        };
        let mut group = SubSequenceGroup::new(SequenceKind::Input, "dill");
        group
            .add(
                SequenceDef::new("t", 1)
                    .with_shape(vec![2])
                    .with_aggregation(Aggregation::Mean),
            )
            .unwrap();
        let mut view = group.get_mut("t").unwrap();
        view.activate_ram(&grid()).unwrap();
        let values = ArrayD::from_elem(IxDyn(&[5, 2]), 3.0);
        view.set_series(values, &options).unwrap();

        let aggregated = view
            .aggregate_series(&[1.0, 1.0], &[true, true])
            .unwrap();
        assert_eq!(aggregated.shape(), &[5]);
        assert_eq!(aggregated[IxDyn(&[0])], 3.0);
    }
}
