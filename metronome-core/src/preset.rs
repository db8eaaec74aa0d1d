//! Preset slots and their persisted flash record.
//!
//! Record layout, 15 bytes at a fixed flash offset:
//!
//! | bytes  | content                          |
//! |--------|----------------------------------|
//! | 0..3   | magic `"BPM"`                    |
//! | 3..7   | tempo of slots 0..3              |
//! | 7..11  | subdivision of slots 0..3        |
//! | 11..15 | accent of slots 0..3 (0 or 1)    |
//!
//! A record is used only when the magic and all twelve fields are valid.
//! Anything else leaves the compiled-in defaults in place.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::engine::TempoEngine;
use crate::hal::{with_interrupts_suspended, HapticOutput, Instant, LightOutput, VibrationBypass};
use crate::types::{MIN_TEMPO, PRESET_COUNT};

/// Record signature
pub const MAGIC: [u8; 3] = *b"BPM";
/// Persisted record length
pub const RECORD_LEN: usize = MAGIC.len() + 3 * PRESET_COUNT;
/// Largest buffer programmed in one write
pub const PAGE_LEN: usize = 256;
/// Largest subdivision accepted from flash. Older records may hold 10.
pub const MAX_STORED_SUBDIVISION: u8 = 10;

const TEMPO_AT: usize = MAGIC.len();
const SUBDIVISION_AT: usize = TEMPO_AT + PRESET_COUNT;
const ACCENT_AT: usize = SUBDIVISION_AT + PRESET_COUNT;

/// A saved tempo, subdivision and accent
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Preset {
    pub tempo: u8,
    pub subdivision: u8,
    pub accent: bool,
}

impl Preset {
    pub const fn new(tempo: u8, subdivision: u8, accent: bool) -> Self {
        Self { tempo, subdivision, accent }
    }

    /// Would this preset pass validation on load
    pub fn is_valid(&self) -> bool {
        self.tempo >= MIN_TEMPO
            && self.subdivision >= 1
            && self.subdivision <= MAX_STORED_SUBDIVISION
    }
}

/// Presets used until a valid record is loaded
pub const DEFAULT_PRESETS: [Preset; PRESET_COUNT] = [
    Preset::new(60, 1, false),
    Preset::new(90, 1, false),
    Preset::new(60, 2, true),
    Preset::new(150, 1, false),
];

/// The four preset slots, always stored together
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresetSet {
    slots: [Preset; PRESET_COUNT],
}

impl Default for PresetSet {
    fn default() -> Self {
        Self { slots: DEFAULT_PRESETS }
    }
}

impl PresetSet {
    pub const fn new(slots: [Preset; PRESET_COUNT]) -> Self {
        Self { slots }
    }

    pub fn get(&self, slot: usize) -> Option<Preset> {
        self.slots.get(slot).copied()
    }

    /// Replace one slot; false if `slot` is out of range
    pub fn set(&mut self, slot: usize, preset: Preset) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) => {
                *entry = preset;
                true
            }
            None => false,
        }
    }

    pub fn slots(&self) -> &[Preset; PRESET_COUNT] {
        &self.slots
    }

    /// Serialize all slots with the magic prefix
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[..MAGIC.len()].copy_from_slice(&MAGIC);
        for (i, preset) in self.slots.iter().enumerate() {
            record[TEMPO_AT + i] = preset.tempo;
            record[SUBDIVISION_AT + i] = preset.subdivision;
            record[ACCENT_AT + i] = preset.accent as u8;
        }
        record
    }

    /// Parse a record. Any bad byte rejects the whole record.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() < RECORD_LEN || record[..MAGIC.len()] != MAGIC {
            return None;
        }

        let mut slots = DEFAULT_PRESETS;
        for (i, slot) in slots.iter_mut().enumerate() {
            let accent = match record[ACCENT_AT + i] {
                0 => false,
                1 => true,
                _ => return None,
            };
            let preset = Preset::new(record[TEMPO_AT + i], record[SUBDIVISION_AT + i], accent);
            if !preset.is_valid() {
                return None;
            }
            *slot = preset;
        }
        Some(Self { slots })
    }
}

/// Errors from saving presets
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Slot index outside 0..4
    InvalidSlot,
    /// Preset would not survive validation on load
    InvalidPreset,
    /// Flash erase or program failed
    Flash(NorFlashErrorKind),
}

impl StoreError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StoreError::InvalidSlot => "invalid preset slot",
            StoreError::InvalidPreset => "invalid preset values",
            StoreError::Flash(_) => "flash operation failed",
        }
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::Flash(kind) => write!(f, "{}: {:?}", self.as_str(), kind),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

/// Preset slots backed by one flash record
pub struct PresetStore<F> {
    flash: F,
    offset: u32,
    presets: PresetSet,
}

impl<F> PresetStore<F>
where
    F: NorFlash,
{
    /// `offset` must be aligned to the flash erase size
    pub fn new(flash: F, offset: u32) -> Self {
        Self {
            flash,
            offset,
            presets: PresetSet::default(),
        }
    }

    pub fn presets(&self) -> &PresetSet {
        &self.presets
    }

    pub fn preset(&self, slot: usize) -> Option<Preset> {
        self.presets.get(slot)
    }

    /// Read and validate the stored record.
    ///
    /// On success the stored presets replace the current ones. On any failure
    /// nothing changes; unreadable flash counts as no record.
    pub fn load(&mut self) -> Option<PresetSet> {
        let mut record = [0u8; RECORD_LEN];
        if self.flash.read(self.offset, &mut record).is_err() {
            warn!("💾 Preset record unreadable");
            return None;
        }
        match PresetSet::decode(&record) {
            Some(presets) => {
                info!("💾 Presets loaded");
                self.presets = presets;
                Some(presets)
            }
            None => {
                info!("💾 No valid preset record, using defaults");
                None
            }
        }
    }

    /// Store a preset in `slot` and persist all slots
    pub fn save(
        &mut self,
        slot: usize,
        tempo: u8,
        subdivision: u8,
        accent: bool,
    ) -> Result<(), StoreError> {
        let preset = Preset::new(tempo, subdivision, accent);
        if !preset.is_valid() {
            return Err(StoreError::InvalidPreset);
        }
        if !self.presets.set(slot, preset) {
            return Err(StoreError::InvalidSlot);
        }
        self.persist()
    }

    /// Erase the record sector and program the current presets.
    ///
    /// Runs with interrupts suspended for the whole erase and program.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        let len = (RECORD_LEN + F::WRITE_SIZE - 1) / F::WRITE_SIZE * F::WRITE_SIZE;
        if len > PAGE_LEN {
            return Err(StoreError::Flash(NorFlashErrorKind::NotAligned));
        }
        let mut page = [0xFFu8; PAGE_LEN];
        page[..RECORD_LEN].copy_from_slice(&self.presets.encode());

        let offset = self.offset;
        let flash = &mut self.flash;
        with_interrupts_suspended(|| {
            flash.erase(offset, offset + F::ERASE_SIZE as u32)?;
            flash.write(offset, &page[..len])
        })
        .map_err(|e| StoreError::Flash(e.kind()))?;

        debug!("💾 Preset record written at {=u32:#x}", offset);
        Ok(())
    }

    /// Recall `slot` into the engine: tempo and accent directly, then
    /// `set_measure` with the stored subdivision, which restarts the beat.
    pub fn apply<L, H, V>(&self, slot: usize, engine: &mut TempoEngine<L, H, V>, now: Instant)
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
    {
        if let Some(preset) = self.presets.get(slot) {
            engine.recall(preset.tempo, preset.subdivision, preset.accent, now);
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash back, e.g. to simulate a power cycle
    pub fn into_flash(self) -> F {
        self.flash
    }
}
