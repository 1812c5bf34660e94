//! A named, ordered collection of sequences of one kind.
//!
//! The group owns the sequence metadata and the [`FastAccess`] backing store
//! in parallel, in declaration order. Lookup hands out a [`SequenceView`]
//! pairing a sequence's metadata with its slot; all value, series and
//! condition operations are implemented on that view (see the `series` and
//! `condition` modules).

use crate::errors::{SequenceError, SequenceResult};
use crate::fastaccess::{FastAccess, Slot};
use crate::sequence::{Sequence, SequenceDef, SequenceKind};
use crate::timegrid::Timegrid;

/// All sequences of one kind belonging to one device.
#[derive(Debug)]
pub struct SubSequenceGroup {
    kind: SequenceKind,
    device: String,
    seqs: Vec<Sequence>,
    fastaccess: FastAccess,
}

impl SubSequenceGroup {
    pub fn new(kind: SequenceKind, device: impl Into<String>) -> Self {
        Self {
            kind,
            device: device.into(),
            seqs: Vec::new(),
            fastaccess: FastAccess::new(),
        }
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Register a new sequence; rejects duplicate names.
    pub fn add(&mut self, def: SequenceDef) -> SequenceResult<()> {
        let shape = match &def.shape {
            Some(shape) => {
                if shape.len() != def.ndim {
                    return Err(SequenceError::DimensionMismatch {
                        name: def.name.clone(),
                        ndim: def.ndim,
                        got: shape.clone(),
                    });
                }
                shape.clone()
            }
            None => vec![0; def.ndim],
        };
        self.fastaccess
            .insert(&def.name, Slot::new(def.ndim, shape.clone(), def.initial))?;
        self.seqs.push(Sequence::from_def(self.kind, &def, &shape));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.seqs.iter().map(Sequence::name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fastaccess.position(name).is_some()
    }

    /// The shared backing store of this group.
    pub fn fastaccess(&self) -> &FastAccess {
        &self.fastaccess
    }

    pub fn fastaccess_mut(&mut self) -> &mut FastAccess {
        &mut self.fastaccess
    }

    /// Look up one sequence by name.
    pub fn get_mut(&mut self, name: &str) -> SequenceResult<SequenceView<'_>> {
        match self.fastaccess.position(name) {
            Some(position) => Ok(SequenceView {
                seq: &mut self.seqs[position],
                slot: &mut self.fastaccess.slots[position],
                device: &self.device,
            }),
            None => Err(SequenceError::UnknownSequence {
                name: name.to_string(),
                group: self.kind.group_name().to_string(),
            }),
        }
    }

    /// Views over all sequences in declaration order.
    pub fn views_mut(&mut self) -> impl Iterator<Item = SequenceView<'_>> {
        let device = self.device.as_str();
        self.seqs
            .iter_mut()
            .zip(self.fastaccess.slots.iter_mut())
            .map(move |(seq, slot)| SequenceView { seq, slot, device })
    }

    /// Activate RAM storage for every sequence of the group.
    pub fn activate_ram(&mut self, grid: &Timegrid) -> SequenceResult<()> {
        for mut view in self.views_mut() {
            view.activate_ram(grid)?;
        }
        Ok(())
    }

    /// Activate disk storage for every sequence of the group.
    pub fn activate_disk(&mut self, grid: &Timegrid, dir: &std::path::Path) -> SequenceResult<()> {
        for mut view in self.views_mut() {
            view.activate_disk(grid, dir)?;
        }
        Ok(())
    }

    pub fn open_files(&mut self, step: usize) -> SequenceResult<()> {
        self.fastaccess.open_files(step)
    }

    pub fn close_files(&mut self) {
        self.fastaccess.close_files();
    }

    pub fn load_data(&mut self, step: usize) -> SequenceResult<()> {
        self.fastaccess.load_data(step)
    }

    pub fn save_data(&mut self, step: usize) -> SequenceResult<()> {
        self.fastaccess.save_data(step)
    }
}

/// Mutable access to one sequence: its metadata plus its FastAccess slot.
///
/// Obtained through [`SubSequenceGroup::get_mut`] or
/// [`SubSequenceGroup::views_mut`]; mutations through the view update the
/// slot immediately, so there is no separate synchronisation step.
#[derive(Debug)]
pub struct SequenceView<'a> {
    pub(crate) seq: &'a mut Sequence,
    pub(crate) slot: &'a mut Slot,
    pub(crate) device: &'a str,
}

impl SequenceView<'_> {
    pub fn name(&self) -> &str {
        self.seq.name()
    }

    pub fn kind(&self) -> SequenceKind {
        self.seq.kind()
    }

    pub fn ndim(&self) -> usize {
        self.seq.ndim()
    }

    pub fn device(&self) -> &str {
        self.device
    }

    /// The qualified name used in error messages and file names.
    pub fn full_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.device,
            self.seq.kind().group_name(),
            self.seq.name()
        )
    }
}
