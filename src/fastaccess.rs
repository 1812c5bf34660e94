//! The flat, name-indexed backing store shared between the managed sequence
//! layer and the per-step evaluation loop.
//!
//! One [`FastAccess`] exists per sequence group. It owns, per quantity, the
//! current value, the dimensionality and per-axis lengths, the memory-mode
//! flags, the RAM series array and the open file handle. The per-step loop
//! only ever touches this struct.
//!
//! Binary record format: IEEE-754 double precision in native byte order, no
//! header, no length prefix. Shape and step count are implied entirely by the
//! quantity's declaration; the only corruption check is that a whole-file
//! read rejects byte counts that do not match the declaration.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, Axis, IxDyn};

use crate::errors::{SequenceError, SequenceResult};
use crate::value::{FloatValue, ValueCell};

const BYTES_PER_VALUE: usize = std::mem::size_of::<FloatValue>();

/// The per-quantity record of a [`FastAccess`] store.
#[derive(Debug)]
pub struct Slot {
    pub(crate) value: ValueCell,
    pub(crate) ndim: usize,
    pub(crate) lengths: Vec<usize>,
    pub(crate) ramflag: bool,
    pub(crate) diskflag: bool,
    /// Simulation step count; meaningful while a memory flag is set.
    pub(crate) steps: usize,
    pub(crate) ram: Option<ArrayD<FloatValue>>,
    pub(crate) file: Option<File>,
    pub(crate) path: Option<PathBuf>,
}

impl Slot {
    pub(crate) fn new(ndim: usize, lengths: Vec<usize>, fill: FloatValue) -> Self {
        debug_assert_eq!(ndim, lengths.len());
        Self {
            value: ValueCell::new(&lengths, fill),
            ndim,
            lengths,
            ramflag: false,
            diskflag: false,
            steps: 0,
            ram: None,
            file: None,
            path: None,
        }
    }

    /// Number of values in one time-step record.
    pub fn record_len(&self) -> usize {
        self.lengths.iter().product()
    }

    pub fn memoryflag(&self) -> bool {
        self.ramflag || self.diskflag
    }

    pub fn ramflag(&self) -> bool {
        self.ramflag
    }

    pub fn diskflag(&self) -> bool {
        self.diskflag
    }

    /// The series shape `(steps,) + quantity shape`.
    pub(crate) fn series_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.lengths.len() + 1);
        shape.push(self.steps);
        shape.extend_from_slice(&self.lengths);
        shape
    }

    fn byte_offset(&self, step: usize) -> u64 {
        (BYTES_PER_VALUE * step * self.record_len()) as u64
    }
}

/// The flat record store of one sequence group.
#[derive(Debug, Default)]
pub struct FastAccess {
    index: HashMap<String, usize>,
    names: Vec<String>,
    pub(crate) slots: Vec<Slot>,
}

impl FastAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: &str, slot: Slot) -> SequenceResult<()> {
        if self.index.contains_key(name) {
            return Err(SequenceError::DuplicateSequence(name.to_string()));
        }
        self.index.insert(name.to_string(), self.slots.len());
        self.names.push(name.to_string());
        self.slots.push(slot);
        Ok(())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.position(name).map(|i| &self.slots[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.position(name).map(|i| &mut self.slots[i])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Open the file of every disk-backed quantity and position it at the
    /// record for `step`.
    pub fn open_files(&mut self, step: usize) -> SequenceResult<()> {
        for (slot, name) in self.slots.iter_mut().zip(&self.names) {
            if !slot.diskflag {
                continue;
            }
            let path = slot
                .path
                .as_ref()
                .ok_or_else(|| SequenceError::StorageNotActive(name.clone()))?;
            let mut file = OpenOptions::new().read(true).write(true).open(path)?;
            file.seek(SeekFrom::Start(slot.byte_offset(step)))?;
            slot.file = Some(file);
        }
        Ok(())
    }

    /// Close all open file handles.
    pub fn close_files(&mut self) {
        for slot in &mut self.slots {
            slot.file = None;
        }
    }

    /// Load the record for `step` into every tracked quantity's current value.
    ///
    /// Disk-backed quantities read one record from their file, RAM-backed
    /// quantities copy `array[step]`; untracked quantities are untouched.
    pub fn load_data(&mut self, step: usize) -> SequenceResult<()> {
        for (slot, name) in self.slots.iter_mut().zip(&self.names) {
            if slot.diskflag {
                let record_len = slot.record_len();
                let offset = slot.byte_offset(step);
                let file = slot
                    .file
                    .as_mut()
                    .ok_or_else(|| SequenceError::StorageNotActive(name.clone()))?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; record_len * BYTES_PER_VALUE];
                file.read_exact(&mut buf)?;
                let target = slot.value.raw_mut();
                for (chunk, value) in buf.chunks_exact(BYTES_PER_VALUE).zip(target.iter_mut()) {
                    *value =
                        FloatValue::from_ne_bytes(chunk.try_into().expect("chunk of 8 bytes"));
                }
            } else if slot.ramflag {
                let ram = slot
                    .ram
                    .as_ref()
                    .ok_or_else(|| SequenceError::StorageNotActive(name.clone()))?;
                let record = ram.index_axis(Axis(0), step);
                slot.value.raw_mut().assign(&record);
            }
        }
        Ok(())
    }

    /// Write every tracked quantity's current value into the record for `step`.
    pub fn save_data(&mut self, step: usize) -> SequenceResult<()> {
        for (slot, name) in self.slots.iter_mut().zip(&self.names) {
            if slot.diskflag {
                let offset = slot.byte_offset(step);
                let mut buf = Vec::with_capacity(slot.record_len() * BYTES_PER_VALUE);
                for value in slot.value.raw().iter() {
                    buf.extend_from_slice(&value.to_ne_bytes());
                }
                let file = slot
                    .file
                    .as_mut()
                    .ok_or_else(|| SequenceError::StorageNotActive(name.clone()))?;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&buf)?;
            } else if slot.ramflag {
                let value = slot.value.raw();
                let ram = slot
                    .ram
                    .as_mut()
                    .ok_or_else(|| SequenceError::StorageNotActive(name.clone()))?;
                ram.index_axis_mut(Axis(0), step).assign(value);
            }
        }
        Ok(())
    }
}

/// Write a whole series array as raw native-endian doubles.
pub(crate) fn write_array(path: &Path, values: &ArrayD<FloatValue>) -> SequenceResult<()> {
    let mut buf = Vec::with_capacity(values.len() * BYTES_PER_VALUE);
    for value in values.iter() {
        buf.extend_from_slice(&value.to_ne_bytes());
    }
    let mut file = File::create(path)?;
    file.write_all(&buf)?;
    Ok(())
}

/// Read a whole series array of the given shape back from disk.
///
/// Fails with [`SequenceError::CorruptSeriesFile`] when the file size does not
/// match the declared shape.
pub(crate) fn read_array(path: &Path, shape: &[usize]) -> SequenceResult<ArrayD<FloatValue>> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    let expected = shape.iter().product::<usize>() * BYTES_PER_VALUE;
    if buf.len() != expected {
        return Err(SequenceError::CorruptSeriesFile {
            path: path.display().to_string(),
            expected,
            got: buf.len(),
        });
    }
    let values: Vec<FloatValue> = buf
        .chunks_exact(BYTES_PER_VALUE)
        .map(|chunk| FloatValue::from_ne_bytes(chunk.try_into().expect("chunk of 8 bytes")))
        .collect();
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)
        .expect("byte count was checked against the shape"))
}
