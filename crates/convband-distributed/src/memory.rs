//! [`RootIo`] over images held in memory.

use crate::coordinator::{IoError, RootIo};
use convband_core::Image;
use std::collections::BTreeMap;

/// In-memory inputs and outputs for a root rank.
///
/// An input slot holding `None` fails to decode, which exercises the
/// skip path of the coordinator.
#[derive(Clone, Debug, Default)]
pub struct MemoryIo {
    inputs: Vec<Option<Image>>,
    exported: BTreeMap<usize, Image>,
    fail_enumerate: bool,
}

impl MemoryIo {
    pub fn new(inputs: impl IntoIterator<Item = Image>) -> Self {
        Self {
            inputs: inputs.into_iter().map(Some).collect(),
            ..Self::default()
        }
    }

    /// Append an input that cannot be decoded.
    pub fn push_undecodable(&mut self) {
        self.inputs.push(None);
    }

    pub fn push(&mut self, image: Image) {
        self.inputs.push(Some(image));
    }

    /// Make [`RootIo::enumerate`] fail.
    pub fn failing_enumeration() -> Self {
        Self {
            fail_enumerate: true,
            ..Self::default()
        }
    }

    pub fn exported(&self, index: usize) -> Option<&Image> {
        self.exported.get(&index)
    }

    pub fn into_exported(self) -> BTreeMap<usize, Image> {
        self.exported
    }
}

impl RootIo for MemoryIo {
    fn enumerate(&mut self) -> Result<usize, IoError> {
        if self.fail_enumerate {
            return Err("input list is unavailable".into());
        }
        Ok(self.inputs.len())
    }

    fn load(&mut self, index: usize) -> Result<Image, IoError> {
        match self.inputs.get(index) {
            Some(Some(image)) => Ok(image.clone()),
            Some(None) => Err(format!("input {index} is not a decodable image").into()),
            None => Err(format!("input {index} does not exist").into()),
        }
    }

    fn export(&mut self, index: usize, image: &Image) -> Result<(), IoError> {
        self.exported.insert(index, image.clone());
        Ok(())
    }
}
