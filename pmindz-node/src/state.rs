//! Cross-episode state, kept in memory that survives deep sleep but
//! not power loss

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the encoded record in retention memory
pub const RECORD_LEN: usize = 24;

const RECORD_MAGIC: u16 = 0x5a50;
const RECORD_VERSION: u8 = 1;
const FLAG_FIRST_BOOT: u8 = 0x01;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("Retention record has bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("Unsupported retention record version {0}")]
    UnsupportedVersion(u8),
    #[error("Retention record checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },
    #[error("Retention storage unavailable")]
    Unavailable,
}

/// The record every wake episode resumes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentCycleState {
    pub boot_count: u32,
    pub sensor_read_count: u32,
    /// microseconds, same timebase as the episode clock
    pub last_read_time: u64,
    pub first_boot: bool,
}

impl Default for PersistentCycleState {
    fn default() -> Self {
        Self {
            boot_count: 0,
            sensor_read_count: 0,
            last_read_time: 0,
            first_boot: true,
        }
    }
}

impl PersistentCycleState {
    /// Layout, little endian:
    /// `magic u16 | version u8 | flags u8 | boot_count u32 |
    ///  sensor_read_count u32 | last_read_time u64 | checksum u32`
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[0..2].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        record[2] = RECORD_VERSION;
        record[3] = if self.first_boot { FLAG_FIRST_BOOT } else { 0 };
        record[4..8].copy_from_slice(&self.boot_count.to_le_bytes());
        record[8..12].copy_from_slice(&self.sensor_read_count.to_le_bytes());
        record[12..20].copy_from_slice(&self.last_read_time.to_le_bytes());
        let checksum = checksum(&record[..20]);
        record[20..24].copy_from_slice(&checksum.to_le_bytes());
        record
    }

    pub fn from_record(record: &[u8; RECORD_LEN]) -> Result<Self, StoreError> {
        let magic = u16::from_le_bytes([record[0], record[1]]);
        if magic != RECORD_MAGIC {
            return Err(StoreError::BadMagic(magic));
        }
        if record[2] != RECORD_VERSION {
            return Err(StoreError::UnsupportedVersion(record[2]));
        }
        let stored = u32::from_le_bytes([record[20], record[21], record[22], record[23]]);
        let computed = checksum(&record[..20]);
        if stored != computed {
            return Err(StoreError::Checksum { stored, computed });
        }

        let mut last_read = [0u8; 8];
        last_read.copy_from_slice(&record[12..20]);
        Ok(Self {
            first_boot: record[3] & FLAG_FIRST_BOOT != 0,
            boot_count: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
            sensor_read_count: u32::from_le_bytes([record[8], record[9], record[10], record[11]]),
            last_read_time: u64::from_le_bytes(last_read),
        })
    }
}

/// FNV-1a
fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ *b as u32).wrapping_mul(0x0100_0193)
    })
}

/// Where the [`PersistentCycleState`] lives between episodes. Loaded
/// once at wake, saved after every mutation.
pub trait CycleStateStore {
    fn load(&mut self) -> Result<PersistentCycleState, StoreError>;
    fn save(&mut self, state: &PersistentCycleState) -> Result<(), StoreError>;
}

/// Store over a raw retention region, e.g. a
/// `#[ram(rtc_fast, persistent)]` static on esp32
pub struct RetainedRecordStore<'a> {
    region: &'a mut [u8; RECORD_LEN],
}

impl<'a> RetainedRecordStore<'a> {
    pub fn new(region: &'a mut [u8; RECORD_LEN]) -> Self {
        Self { region }
    }
}

impl CycleStateStore for RetainedRecordStore<'_> {
    fn load(&mut self) -> Result<PersistentCycleState, StoreError> {
        PersistentCycleState::from_record(&*self.region)
    }

    fn save(&mut self, state: &PersistentCycleState) -> Result<(), StoreError> {
        *self.region = state.to_record();
        Ok(())
    }
}

impl<T: CycleStateStore + ?Sized> CycleStateStore for &mut T {
    fn load(&mut self) -> Result<PersistentCycleState, StoreError> {
        (**self).load()
    }

    fn save(&mut self, state: &PersistentCycleState) -> Result<(), StoreError> {
        (**self).save(state)
    }
}
