//! Band catalog and enabled-band rotation.
//!
//! The catalog is fixed at compile time. Which bands take part in the
//! rotation is an [`EnabledBands`] bitmask written by the control surface and
//! copied into the [`BandTable`] before every selection.

use crate::types::Frequency;
use rand::Rng;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Margin kept from each sub-band edge so the ~6 Hz wide signal stays inside.
pub const DEFAULT_GUARD_HZ: u64 = 15;

pub type BandIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Band {
    pub name: &'static str,
    pub sub_band_start_hz: u64,
    pub sub_band_end_hz: u64,
}

impl Band {
    const fn new(name: &'static str, sub_band_start_hz: u64, sub_band_end_hz: u64) -> Self {
        Self { name, sub_band_start_hz, sub_band_end_hz }
    }

    /// Bottom of the sub-band, used as the reference frequency in status output.
    #[must_use]
    pub const fn reference(&self) -> Frequency {
        Frequency::from_hz(self.sub_band_start_hz)
    }
}

pub const WSPR_BANDS: [Band; 9] = [
    Band::new("80m", 3_570_000, 3_570_200),
    Band::new("40m", 7_040_000, 7_040_200),
    Band::new("30m", 10_140_100, 10_140_300),
    Band::new("20m", 14_097_000, 14_097_200),
    Band::new("17m", 18_106_000, 18_106_200),
    Band::new("15m", 21_096_000, 21_096_200),
    Band::new("12m", 24_926_000, 24_926_200),
    Band::new("10m", 28_126_000, 28_126_200),
    Band::new("6m", 50_293_000, 50_293_200),
];

// The enabled set is a u16 bitmask.
const_assert!(WSPR_BANDS.len() <= 16);

/// Default band when nothing has been configured: 20m.
pub const DEFAULT_BAND_INDEX: BandIndex = 3;

/// Bitmask of enabled band indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<BandIndex>", into = "Vec<BandIndex>")]
pub struct EnabledBands(u16);

impl EnabledBands {
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from indices; indices outside the catalog are ignored.
    pub fn from_indices<I: IntoIterator<Item = BandIndex>>(indices: I) -> Self {
        let mut set = Self::none();
        for index in indices {
            set.set(index, true);
        }
        set
    }

    /// Parse a comma separated index list such as `"0,3,5"`.
    ///
    /// Malformed or out-of-range tokens are skipped, so `"3,x,42"` enables 20m only.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        Self::from_indices(
            list.split(',')
                .filter_map(|token| token.trim().parse::<BandIndex>().ok()),
        )
    }

    pub fn set(&mut self, index: BandIndex, enabled: bool) {
        if index >= WSPR_BANDS.len() {
            return;
        }
        if enabled {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    #[must_use]
    pub const fn contains(self, index: BandIndex) -> bool {
        index < 16 && self.0 & (1 << index) != 0
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn indices(self) -> impl Iterator<Item = BandIndex> {
        (0..WSPR_BANDS.len()).filter(move |&i| self.contains(i))
    }
}

impl From<Vec<BandIndex>> for EnabledBands {
    fn from(indices: Vec<BandIndex>) -> Self {
        Self::from_indices(indices)
    }
}

impl From<EnabledBands> for Vec<BandIndex> {
    fn from(set: EnabledBands) -> Self {
        set.indices().collect()
    }
}

#[derive(Debug, Clone)]
pub struct BandTable {
    bands: &'static [Band],
    enabled: EnabledBands,
    guard_hz: u64,
}

impl BandTable {
    #[must_use]
    pub fn new(enabled: EnabledBands, guard_hz: u64) -> Self {
        Self::with_bands(&WSPR_BANDS, enabled, guard_hz)
    }

    #[must_use]
    pub fn with_bands(bands: &'static [Band], enabled: EnabledBands, guard_hz: u64) -> Self {
        debug_assert!(bands.len() <= 16, "band catalog exceeds bitmask width");
        Self { bands, enabled, guard_hz }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    #[must_use]
    pub fn band(&self, index: BandIndex) -> Option<&Band> {
        self.bands.get(index)
    }

    #[must_use]
    pub fn bands(&self) -> &[Band] {
        self.bands
    }

    #[must_use]
    pub fn enabled(&self) -> EnabledBands {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: EnabledBands) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn guard_hz(&self) -> u64 {
        self.guard_hz
    }

    fn is_enabled(&self, index: BandIndex) -> bool {
        index < self.bands.len() && self.enabled.contains(index)
    }

    fn enabled_count(&self) -> usize {
        (0..self.bands.len()).filter(|&i| self.is_enabled(i)).count()
    }

    /// Lowest enabled index, or 0 when nothing is enabled.
    ///
    /// Index 0 in the empty case is a placeholder; callers treat an empty set
    /// as a stuck rotation rather than an error.
    #[must_use]
    pub fn first_enabled(&self) -> BandIndex {
        (0..self.bands.len()).find(|&i| self.is_enabled(i)).unwrap_or(0)
    }

    /// Next enabled index after `current`, wrapping around the catalog.
    #[must_use]
    pub fn next_enabled(&self, current: BandIndex) -> BandIndex {
        let n = self.bands.len();
        match self.enabled_count() {
            0 => current,
            1 => self.first_enabled(),
            _ => {
                // At least two bits are set, so the scan ends within n steps.
                let mut index = current;
                for _ in 0..n {
                    index = (index + 1) % n;
                    if self.is_enabled(index) {
                        return index;
                    }
                }
                current
            }
        }
    }

    /// Inclusive range of usable operating frequencies in hertz.
    #[must_use]
    pub fn usable_range(&self, index: BandIndex) -> Option<(u64, u64)> {
        let band = self.band(index)?;
        let low = band.sub_band_start_hz + self.guard_hz;
        let high = band.sub_band_end_hz.checked_sub(self.guard_hz)?;
        (low <= high).then_some((low, high))
    }

    /// Uniformly random operating frequency inside the guarded sub-band.
    ///
    /// Drawn fresh for every transmission attempt.
    pub fn random_frequency_with<R: Rng + ?Sized>(&self, index: BandIndex, rng: &mut R) -> Option<u64> {
        let (low, high) = self.usable_range(index)?;
        Some(rng.gen_range(low..=high))
    }

    #[must_use]
    pub fn random_frequency(&self, index: BandIndex) -> Option<u64> {
        self.random_frequency_with(index, &mut rand::thread_rng())
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self::new(EnabledBands::from_indices([DEFAULT_BAND_INDEX]), DEFAULT_GUARD_HZ)
    }
}
