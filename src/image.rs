use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AsmError, Diagnostic, SourcePos};

const ADDRESS_SPACE: usize = 0x1_0000;

/// Bytes emitted by one node at an absolute address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub address: u16,
    pub bytes: Vec<u8>,
    pub pos: SourcePos,
}

/// Flat binary covering the lowest to the highest emitted address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub base: u16,
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at an absolute address, if the image covers it.
    pub fn byte_at(&self, addr: u16) -> Option<u8> {
        let off = addr.checked_sub(self.base)?;
        self.bytes.get(off as usize).copied()
    }
}

/// Collects runs and lays them out, refusing any byte written twice.
pub struct ImageWriter {
    occupied: BitVec,
    runs: Vec<Run>,
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter {
    pub fn new() -> Self {
        Self { occupied: bitvec![0; ADDRESS_SPACE], runs: Vec::new() }
    }

    pub fn add(&mut self, run: Run) -> Result<(), Diagnostic> {
        let start = run.address as usize;
        let end = start + run.bytes.len();
        if end > ADDRESS_SPACE {
            return Err(AsmError::AddressOverflow(format!(
                "{} byte(s) at ${:04X} run past $FFFF",
                run.bytes.len(),
                run.address
            ))
            .at(&run.pos));
        }
        if let Some(i) = self.occupied[start..end].first_one() {
            return Err(AsmError::LayoutConflict { addr: (start + i) as u16 }.at(&run.pos));
        }
        self.occupied[start..end].fill(true);
        if !run.bytes.is_empty() {
            self.runs.push(run);
        }
        Ok(())
    }

    pub fn finish(self) -> Image {
        let (Some(lo), Some(hi)) = (self.occupied.first_one(), self.occupied.last_one()) else {
            return Image::default();
        };
        let mut bytes = vec![0u8; hi + 1 - lo];
        for run in &self.runs {
            let off = run.address as usize - lo;
            bytes[off..off + run.bytes.len()].copy_from_slice(&run.bytes);
        }
        Image { base: lo as u16, bytes }
    }

    pub fn write(runs: impl IntoIterator<Item = Run>) -> Result<Image, Diagnostic> {
        let mut w = ImageWriter::new();
        for run in runs {
            w.add(run)?;
        }
        Ok(w.finish())
    }
}
