//! The per-device aggregate of all sequence groups.
//!
//! A model container carries one group per model kind in fixed order; a node
//! container carries the sim and obs groups. Bulk operations fan out over the
//! groups, skipping kinds without the relevant capability.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use log::warn;
use ndarray::ArrayD;

use crate::checkpoint::{Checkpoint, CheckpointInfo, ConditionValue};
use crate::errors::{SequenceError, SequenceResult};
use crate::group::{SequenceView, SubSequenceGroup};
use crate::manager::{ConditionPaths, SeriesManager};
use crate::options::Options;
use crate::sequence::{SequenceDef, SequenceKind};
use crate::timegrid::Timegrid;
use crate::value::FloatValue;

/// Nested mapping of all condition values: group name → sequence name → value.
pub type Conditions = BTreeMap<String, BTreeMap<String, ArrayD<FloatValue>>>;

const MODEL_KINDS: [SequenceKind; 7] = [
    SequenceKind::Input,
    SequenceKind::Flux,
    SequenceKind::State,
    SequenceKind::Log,
    SequenceKind::Aide,
    SequenceKind::Inlet,
    SequenceKind::Outlet,
];

const NODE_KINDS: [SequenceKind; 2] = [SequenceKind::NodeSim, SequenceKind::NodeObs];

/// All sequences of one device.
#[derive(Debug)]
pub struct SequenceContainer {
    device: Option<String>,
    model_type: String,
    control_ref: Option<String>,
    groups: Vec<SubSequenceGroup>,
}

impl SequenceContainer {
    /// A container for a model instance, with one group per model kind.
    pub fn model(model_type: impl Into<String>, device: Option<&str>) -> Self {
        Self::build(model_type.into(), device, &MODEL_KINDS)
    }

    /// A container for a network node, with the sim and obs groups.
    pub fn node(device: Option<&str>) -> Self {
        Self::build("node".to_string(), device, &NODE_KINDS)
    }

    fn build(model_type: String, device: Option<&str>, kinds: &[SequenceKind]) -> Self {
        let name = device.unwrap_or("?");
        Self {
            device: device.map(str::to_string),
            model_type,
            control_ref: None,
            groups: kinds
                .iter()
                .map(|kind| SubSequenceGroup::new(*kind, name))
                .collect(),
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Name of the control file the parameter values came from; recorded in
    /// the `[info]` preamble of written condition files.
    pub fn set_control_ref(&mut self, control: impl Into<String>) {
        self.control_ref = Some(control.into());
    }

    pub fn group(&self, kind: SequenceKind) -> Option<&SubSequenceGroup> {
        self.groups.iter().find(|group| group.kind() == kind)
    }

    pub fn group_mut(&mut self, kind: SequenceKind) -> Option<&mut SubSequenceGroup> {
        self.groups.iter_mut().find(|group| group.kind() == kind)
    }

    fn require_group_mut(&mut self, kind: SequenceKind) -> SequenceResult<&mut SubSequenceGroup> {
        self.group_mut(kind)
            .ok_or_else(|| SequenceError::UnknownGroup(kind.group_name().to_string()))
    }

    /// Register a sequence in the group of the given kind.
    pub fn add(&mut self, kind: SequenceKind, def: SequenceDef) -> SequenceResult<()> {
        self.require_group_mut(kind)?.add(def)
    }

    /// Look up one sequence by kind and name.
    pub fn get_mut(&mut self, kind: SequenceKind, name: &str) -> SequenceResult<SequenceView<'_>> {
        self.require_group_mut(kind)?.get_mut(name)
    }

    /// Activate RAM series storage for every time-series capable sequence.
    pub fn prepare_allseries_ram(&mut self, grid: &Timegrid) -> SequenceResult<()> {
        for group in self.series_groups_mut() {
            group.activate_ram(grid)?;
        }
        Ok(())
    }

    /// Activate disk series storage for every time-series capable sequence.
    pub fn prepare_allseries_disk(&mut self, grid: &Timegrid, dir: &Path) -> SequenceResult<()> {
        for group in self.series_groups_mut() {
            group.activate_disk(grid, dir)?;
        }
        Ok(())
    }

    fn series_groups_mut(&mut self) -> impl Iterator<Item = &mut SubSequenceGroup> {
        self.groups
            .iter_mut()
            .filter(|group| group.kind().has_series())
    }

    fn condition_groups_mut(&mut self) -> impl Iterator<Item = &mut SubSequenceGroup> {
        self.groups
            .iter_mut()
            .filter(|group| group.kind().is_condition())
    }

    /// Position the file handles of all disk-mode sequences at the given step.
    pub fn open_files(&mut self, step: usize) -> SequenceResult<()> {
        for group in &mut self.groups {
            group.open_files(step)?;
        }
        Ok(())
    }

    pub fn close_files(&mut self) {
        for group in &mut self.groups {
            group.close_files();
        }
    }

    /// Fill all current values from the active series stores.
    pub fn load_data(&mut self, step: usize) -> SequenceResult<()> {
        for group in &mut self.groups {
            group.load_data(step)?;
        }
        Ok(())
    }

    /// Persist all current values into the active series stores.
    pub fn save_data(&mut self, step: usize) -> SequenceResult<()> {
        for group in &mut self.groups {
            group.save_data(step)?;
        }
        Ok(())
    }

    /// A deep copy of all condition values, by group and sequence name.
    pub fn conditions(&mut self) -> SequenceResult<Conditions> {
        let mut conditions = Conditions::new();
        for group in self.condition_groups_mut() {
            let group_name = group.kind().group_name().to_string();
            let mut entries = BTreeMap::new();
            for view in group.views_mut() {
                entries.insert(view.name().to_string(), view.value()?.clone());
            }
            conditions.insert(group_name, entries);
        }
        Ok(conditions)
    }

    /// Apply condition values through the full assignment lifecycle.
    ///
    /// After every value has been applied, all condition sequences are
    /// trimmed once more in reverse declaration order, so sequences whose
    /// spans depend on each other settle on consistent values.
    pub fn set_conditions(&mut self, conditions: &Conditions) -> SequenceResult<()> {
        for group in self.condition_groups_mut() {
            let group_name = group.kind().group_name();
            if let Some(entries) = conditions.get(group_name) {
                for (name, values) in entries {
                    group.get_mut(name)?.apply(values.clone())?;
                }
            }
        }
        for group in self.condition_groups_mut() {
            let mut views: Vec<SequenceView<'_>> = group.views_mut().collect();
            for view in views.iter_mut().rev() {
                view.trim();
            }
        }
        Ok(())
    }

    /// Write the current conditions as a TOML condition file.
    pub fn save_conditions(
        &mut self,
        paths: &ConditionPaths,
        filename: Option<&str>,
    ) -> SequenceResult<()> {
        let path = paths.filepath(self.device(), filename)?;
        let conditions = self.conditions()?;
        let mut serialised = BTreeMap::new();
        for (group_name, entries) in &conditions {
            let converted = entries
                .iter()
                .map(|(name, values)| (name.clone(), ConditionValue::from_array(values)))
                .collect();
            serialised.insert(group_name.clone(), converted);
        }
        let checkpoint = Checkpoint {
            info: CheckpointInfo {
                model: self.model_type.clone(),
                control: self.control_ref.clone().unwrap_or_default(),
            },
            conditions: serialised,
        };
        checkpoint.write(&path)
    }

    /// Read a TOML condition file and apply it through the ordinary setters.
    pub fn load_conditions(
        &mut self,
        paths: &ConditionPaths,
        filename: Option<&str>,
    ) -> SequenceResult<()> {
        let path = paths.filepath(self.device(), filename)?;
        let checkpoint = Checkpoint::read(&path)?;
        for group in self.condition_groups_mut() {
            let group_name = group.kind().group_name();
            if let Some(entries) = checkpoint.conditions.get(group_name) {
                for (name, value) in entries {
                    group.get_mut(name)?.apply(value.to_input())?;
                }
            }
        }
        Ok(())
    }

    /// Fill all active series stores from externally managed files.
    ///
    /// Sim-node load failures only warn under `warn_missing_sim_file`;
    /// missing obs-node files additionally deactivate that sequence's memory
    /// mode under `warn_missing_obs_file`. Everything else propagates.
    pub fn load_allseries(
        &mut self,
        manager: &dyn SeriesManager,
        sim: &Timegrid,
        options: &Options,
    ) -> SequenceResult<()> {
        for group in self.series_groups_mut() {
            let kind = group.kind();
            let group_name = kind.group_name();
            for mut view in group.views_mut() {
                if !view.memoryflag() {
                    continue;
                }
                let loaded = manager.load_series(view.device(), group_name, view.name());
                let result = loaded.and_then(|(external, values)| {
                    let adjusted = view.adjust_series(sim, &external, &values, options)?;
                    view.set_series(adjusted, options)
                });
                if let Err(error) = result {
                    match kind {
                        SequenceKind::NodeSim if options.warn_missing_sim_file => {
                            warn!(
                                "cannot load the sim series of `{}`: {error}",
                                view.full_name()
                            );
                        }
                        SequenceKind::NodeObs
                            if options.warn_missing_obs_file && is_missing_file(&error) =>
                        {
                            warn!(
                                "no obs series file for `{}`; deactivating its memory mode",
                                view.full_name()
                            );
                            view.deactivate_ram();
                            view.deactivate_disk()?;
                        }
                        _ => return Err(error),
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand all active series over to the external manager.
    pub fn save_allseries(
        &mut self,
        manager: &mut dyn SeriesManager,
        grid: &Timegrid,
    ) -> SequenceResult<()> {
        for group in self.series_groups_mut() {
            let group_name = group.kind().group_name();
            for view in group.views_mut() {
                if !view.memoryflag() {
                    continue;
                }
                let values = view.series()?;
                manager.save_series(view.device(), group_name, view.name(), grid, &values)?;
            }
        }
        Ok(())
    }
}

fn is_missing_file(error: &SequenceError) -> bool {
    matches!(error, SequenceError::Io(io) if io.kind() == ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};

    fn lland_container() -> SequenceContainer {
        let mut container = SequenceContainer::model("lland_v1", Some("dill"));
        container
            .add(SequenceKind::Input, SequenceDef::new("nied", 0))
            .unwrap();
        container
            .add(SequenceKind::Flux, SequenceDef::new("qah", 0))
            .unwrap();
        container
            .add(
                SequenceKind::State,
                SequenceDef::new("bowa", 1)
                    .with_shape(vec![2])
                    .with_span(Some(0.0), None),
            )
            .unwrap();
        container
            .add(SequenceKind::Log, SequenceDef::new("wet0", 0))
            .unwrap();
        container
            .add(SequenceKind::Aide, SequenceDef::new("temp", 0))
            .unwrap();
        container
    }

    fn grid() -> Timegrid {
        Timegrid::new(0.0, 4.0, 1.0).unwrap()
    }

    #[test]
    fn model_containers_carry_the_model_groups() {
        let container = lland_container();
        assert!(container.group(SequenceKind::Input).is_some());
        assert!(container.group(SequenceKind::Outlet).is_some());
        assert!(container.group(SequenceKind::NodeSim).is_none());
    }

    #[test]
    fn node_containers_carry_sim_and_obs() {
        let container = SequenceContainer::node(Some("lahn_1"));
        assert!(container.group(SequenceKind::NodeSim).is_some());
        assert!(container.group(SequenceKind::NodeObs).is_some());
        assert!(container.group(SequenceKind::Input).is_none());
    }

    #[test]
    fn prepare_allseries_skips_groups_without_series() {
        let mut container = lland_container();
        container.prepare_allseries_ram(&grid()).unwrap();
        let aide = container.get_mut(SequenceKind::Aide, "temp").unwrap();
        assert!(!aide.memoryflag());
        let input = container.get_mut(SequenceKind::Input, "nied").unwrap();
        assert!(input.ramflag());
    }

    #[test]
    fn conditions_round_trip() {
        let mut container = lland_container();
        container
            .get_mut(SequenceKind::State, "bowa")
            .unwrap()
            .apply(vec![30.0, 40.0])
            .unwrap();
        container
            .get_mut(SequenceKind::Log, "wet0")
            .unwrap()
            .apply(0.5)
            .unwrap();

        let mut conditions = container.conditions().unwrap();
        assert_eq!(
            conditions["states"]["bowa"],
            array![30.0, 40.0].into_dyn()
        );

        conditions
            .get_mut("states")
            .unwrap()
            .insert("bowa".to_string(), array![-10.0, 70.0].into_dyn());
        container.set_conditions(&conditions).unwrap();

        // The lower span bound trims the negative entry back to zero.
        let restored = container.conditions().unwrap();
        assert_eq!(restored["states"]["bowa"], array![0.0, 70.0].into_dyn());
        assert_eq!(
            restored["logs"]["wet0"],
            ArrayD::from_elem(IxDyn(&[]), 0.5)
        );
        let bowa = container.get_mut(SequenceKind::State, "bowa").unwrap();
        assert_eq!(bowa.old().unwrap(), &array![0.0, 70.0].into_dyn());
    }

    #[test]
    fn condition_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConditionPaths::new(dir.path());

        let mut container = lland_container();
        container.set_control_ref("dill.toml");
        container
            .get_mut(SequenceKind::State, "bowa")
            .unwrap()
            .apply(vec![12.5, 13.5])
            .unwrap();
        container
            .get_mut(SequenceKind::Log, "wet0")
            .unwrap()
            .apply(0.25)
            .unwrap();
        container.save_conditions(&paths, None).unwrap();

        let mut restored = lland_container();
        restored.load_conditions(&paths, None).unwrap();
        assert_eq!(
            restored.conditions().unwrap(),
            container.conditions().unwrap()
        );
    }

    #[test]
    fn save_conditions_without_device_needs_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConditionPaths::new(dir.path());
        let mut container = SequenceContainer::model("lland_v1", None);
        let err = container.save_conditions(&paths, None).unwrap_err();
        assert!(matches!(err, SequenceError::DeviceNameUnknown));
        container.save_conditions(&paths, Some("anonymous")).unwrap();
    }

    struct MapManager {
        dir: std::path::PathBuf,
        grid: Timegrid,
        series: BTreeMap<String, ArrayD<FloatValue>>,
    }

    impl SeriesManager for MapManager {
        fn directory(&self) -> &Path {
            &self.dir
        }

        fn overwrite(&self) -> bool {
            true
        }

        fn load_series(
            &self,
            device: &str,
            group: &str,
            name: &str,
        ) -> SequenceResult<(Timegrid, ArrayD<FloatValue>)> {
            match self.series.get(&format!("{device}.{group}.{name}")) {
                Some(values) => Ok((self.grid, values.clone())),
                None => Err(SequenceError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    "no such series",
                ))),
            }
        }

        fn save_series(
            &mut self,
            device: &str,
            group: &str,
            name: &str,
            _grid: &Timegrid,
            values: &ArrayD<FloatValue>,
        ) -> SequenceResult<()> {
            self.series
                .insert(format!("{device}.{group}.{name}"), values.clone());
            Ok(())
        }
    }

    fn map_manager() -> MapManager {
        MapManager {
            dir: std::path::PathBuf::from("/tmp/series"),
            grid: grid(),
            series: BTreeMap::new(),
        }
    }

    #[test]
    fn load_and_save_allseries_through_the_manager() {
        let mut manager = map_manager();
        manager
            .series
            .insert("dill.inputs.nied".to_string(), array![1.0, 2.0, 3.0, 4.0].into_dyn());

        let mut container = SequenceContainer::model("lland_v1", Some("dill"));
        container
            .add(SequenceKind::Input, SequenceDef::new("nied", 0))
            .unwrap();
        container.prepare_allseries_ram(&grid()).unwrap();
        container
            .load_allseries(&manager, &grid(), &Options::default())
            .unwrap();

        let view = container.get_mut(SequenceKind::Input, "nied").unwrap();
        assert_eq!(view.series().unwrap(), array![1.0, 2.0, 3.0, 4.0].into_dyn());

        container.save_allseries(&mut manager, &grid()).unwrap();
        assert_eq!(
            manager.series["dill.inputs.nied"],
            array![1.0, 2.0, 3.0, 4.0].into_dyn()
        );
    }

    #[test]
    fn missing_sim_series_only_warns_when_tolerated() {
        let manager = map_manager();
        let mut node = SequenceContainer::node(Some("lahn_1"));
        node.add(SequenceKind::NodeSim, SequenceDef::new("sim", 0))
            .unwrap();
        node.prepare_allseries_ram(&grid()).unwrap();

        let err = node
            .load_allseries(&manager, &grid(), &Options::default())
            .unwrap_err();
        assert!(matches!(err, SequenceError::Io(_)));

        let mut options = Options::default();
        options.warn_missing_sim_file = true;
        node.load_allseries(&manager, &grid(), &options).unwrap();
        let view = node.get_mut(SequenceKind::NodeSim, "sim").unwrap();
        assert!(view.ramflag());
    }

    #[test]
    fn missing_obs_series_deactivates_the_memory_mode() {
        let manager = map_manager();
        let mut node = SequenceContainer::node(Some("lahn_1"));
        node.add(SequenceKind::NodeObs, SequenceDef::new("obs", 0))
            .unwrap();
        node.prepare_allseries_ram(&grid()).unwrap();

        let mut options = Options::default();
        options.warn_missing_obs_file = true;
        node.load_allseries(&manager, &grid(), &options).unwrap();
        let view = node.get_mut(SequenceKind::NodeObs, "obs").unwrap();
        assert!(!view.memoryflag());
    }
}
