// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key→blob NVRAM abstraction.
//!
//! The runtime persists everything through a small set of numeric slots:
//! the script body/size/name, the console lockdown bit, and one slot per
//! property-store field. Blobs are opaque bytes; where a length is
//! ambiguous it is stored in its own sibling slot.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

pub type NvId = u16;

/// First slot reserved for the runtime's own use.
pub const APPS_BASE: NvId = 0x8000;
pub const SCRIPT_NAME_ID: NvId = APPS_BASE;
pub const SCRIPT_ID: NvId = APPS_BASE + 1;
pub const SCRIPT_SIZE_ID: NvId = APPS_BASE + 2;
pub const LOCKDOWN_ID: NvId = APPS_BASE + 3;
/// Property-store fields are indexed off this base.
pub const PROPSTORE_BASE: NvId = APPS_BASE + 32;

/// Total storage budget of the default stores, in bytes.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// The storage seam. One implementation wraps a host file, one lives in
/// memory for tests and simulation.
///
/// Streaming writers `create`/`append` exist so a script larger than any
/// single wire message can be committed incrementally; `write` is the
/// one-shot convenience over them.
pub trait Nvram: Send {
    fn exist(&self, id: NvId) -> bool;

    /// Read the whole blob stored under `id`.
    fn peek(&self, id: NvId) -> Option<Bytes>;

    /// Begin writing `id`, reserving `capacity` bytes. Replaces any
    /// existing blob.
    fn create(&mut self, id: NvId, capacity: usize) -> CoreResult<()>;

    /// Append to a slot begun with [`Nvram::create`]. Fails with
    /// `Resources` when the reservation would be exceeded.
    fn append(&mut self, id: NvId, data: &[u8]) -> CoreResult<()>;

    /// One-shot create + append + commit.
    fn write(&mut self, id: NvId, data: &[u8]) -> CoreResult<()> {
        self.create(id, data.len())?;
        self.append(id, data)?;
        self.commit()
    }

    fn delete(&mut self, id: NvId) -> CoreResult<()>;

    /// Bytes still available for new blobs.
    fn remaining(&self) -> usize;

    /// Flush to stable storage.
    fn commit(&mut self) -> CoreResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SlotMap {
    slots: BTreeMap<NvId, Vec<u8>>,
    #[serde(skip)]
    reserved: BTreeMap<NvId, usize>,
}

impl SlotMap {
    fn used(&self) -> usize {
        self.slots.values().map(Vec::len).sum::<usize>()
            + self
                .reserved
                .iter()
                .map(|(id, cap)| cap.saturating_sub(self.slots.get(id).map_or(0, Vec::len)))
                .sum::<usize>()
    }

    fn create(&mut self, id: NvId, capacity: usize, budget: usize) -> CoreResult<()> {
        let without = self.used()
            - self.slots.get(&id).map_or(0, Vec::len)
            - self.reserved.get(&id).copied().unwrap_or(0);
        if without + capacity > budget {
            warn!(id, capacity, "nvram full");
            return Err(CoreError::Resources);
        }
        self.slots.insert(id, Vec::with_capacity(capacity));
        self.reserved.insert(id, capacity);
        Ok(())
    }

    fn append(&mut self, id: NvId, data: &[u8], budget: usize) -> CoreResult<()> {
        let used = self.used();
        let reserved = self.reserved.get(&id).copied();
        let slot = self.slots.entry(id).or_default();
        let over_reservation =
            matches!(reserved, Some(cap) if slot.len() + data.len() > cap);
        // An unreserved append grows the slot, so it must fit the budget.
        let over_budget = reserved.is_none() && used + data.len() > budget;
        if over_reservation || over_budget {
            return Err(CoreError::Resources);
        }
        slot.extend_from_slice(data);
        Ok(())
    }
}

/// Volatile store used by tests and the in-process simulator.
#[derive(Debug)]
pub struct MemNvram {
    map: SlotMap,
    capacity: usize,
}

impl Default for MemNvram {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemNvram {
    pub fn new(capacity: usize) -> Self {
        Self { map: SlotMap::default(), capacity }
    }
}

impl Nvram for MemNvram {
    fn exist(&self, id: NvId) -> bool {
        self.map.slots.contains_key(&id)
    }

    fn peek(&self, id: NvId) -> Option<Bytes> {
        self.map.slots.get(&id).map(|v| Bytes::copy_from_slice(v))
    }

    fn create(&mut self, id: NvId, capacity: usize) -> CoreResult<()> {
        self.map.create(id, capacity, self.capacity)
    }

    fn append(&mut self, id: NvId, data: &[u8]) -> CoreResult<()> {
        self.map.append(id, data, self.capacity)
    }

    fn delete(&mut self, id: NvId) -> CoreResult<()> {
        self.map.slots.remove(&id);
        self.map.reserved.remove(&id);
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.map.used())
    }

    fn commit(&mut self) -> CoreResult<()> {
        self.map.reserved.clear();
        Ok(())
    }
}

/// File-backed store. The whole slot map is serialized to one JSON file on
/// every commit; slot payloads are hex strings to keep the file greppable.
#[derive(Debug)]
pub struct FileNvram {
    path: PathBuf,
    map: SlotMap,
    capacity: usize,
}

#[derive(Serialize, Deserialize)]
struct FileImage {
    slots: BTreeMap<NvId, String>,
}

fn to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

impl FileNvram {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let map = match std::fs::read(&path) {
            Ok(raw) => {
                let image: FileImage =
                    serde_json::from_slice(&raw).map_err(|_| CoreError::Invalid)?;
                let mut map = SlotMap::default();
                for (id, hex) in image.slots {
                    map.slots.insert(id, from_hex(&hex).ok_or(CoreError::Invalid)?);
                }
                map
            }
            Err(_) => {
                debug!(path = %path.display(), "starting with empty nvram");
                SlotMap::default()
            }
        };
        Ok(Self { path, map, capacity: DEFAULT_CAPACITY })
    }

    fn flush(&self) -> CoreResult<()> {
        let image = FileImage {
            slots: self.map.slots.iter().map(|(id, v)| (*id, to_hex(v))).collect(),
        };
        let raw = serde_json::to_vec_pretty(&image).map_err(|_| CoreError::Fail("encode"))?;
        std::fs::write(&self.path, raw).map_err(|_| CoreError::Write)
    }
}

impl Nvram for FileNvram {
    fn exist(&self, id: NvId) -> bool {
        self.map.slots.contains_key(&id)
    }

    fn peek(&self, id: NvId) -> Option<Bytes> {
        self.map.slots.get(&id).map(|v| Bytes::copy_from_slice(v))
    }

    fn create(&mut self, id: NvId, capacity: usize) -> CoreResult<()> {
        self.map.create(id, capacity, self.capacity)
    }

    fn append(&mut self, id: NvId, data: &[u8]) -> CoreResult<()> {
        self.map.append(id, data, self.capacity)
    }

    fn delete(&mut self, id: NvId) -> CoreResult<()> {
        self.map.slots.remove(&id);
        self.map.reserved.remove(&id);
        self.flush()
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.map.used())
    }

    fn commit(&mut self) -> CoreResult<()> {
        self.map.reserved.clear();
        self.flush()
    }
}

/// Read a little-endian u32 stored as a 4-byte blob (the script-size slot).
pub fn read_u32(nv: &dyn Nvram, id: NvId) -> Option<u32> {
    let raw = nv.peek(id)?;
    let arr: [u8; 4] = raw.as_ref().try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

/// Store a u32 as a 4-byte little-endian blob.
pub fn write_u32(nv: &mut dyn Nvram, id: NvId, value: u32) -> CoreResult<()> {
    nv.write(id, &value.to_le_bytes())
}

#[cfg(test)]
#[path = "nvram_tests.rs"]
mod tests;
