//! PRB and RBG bookkeeping for the shared channel allocator
//!
//! PRB indices are relative to the start of the BWP. A [`PrbBitmap`] marks the PRBs
//! used in one slot, a [`PrbGrant`] is the shape a scheduler hands to the allocator:
//! an RBG mask (resource allocation type 0) or a contiguous interval (type 1).

use common::utils::ceil_div;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use thiserror::Error;

/// Maximum BWP width in PRBs (TS 38.101-1 Table 5.3.2-1)
pub const MAX_NOF_PRB: u32 = 275;
/// Maximum number of RBGs in a BWP (275 PRBs with P = 16 and an unaligned start)
pub const MAX_NOF_RBG: u32 = 19;

const WORD_BITS: u32 = u64::BITS;

/// Errors raised by out of range bitmap accesses
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrbError {
    #[error("Index {index} out of range for bitmap of size {size}")]
    IndexOutOfRange { index: u32, size: u32 },

    #[error("RBG bitmap has {actual} RBGs but the BWP has {expected}")]
    SizeMismatch { expected: u32, actual: u32 },
}

/// Contiguous PRB range `[start, start + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrbInterval {
    start: u32,
    length: u32,
}

impl PrbInterval {
    /// Interval from a start PRB and a number of PRBs
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// Interval from its first PRB and one past its last PRB
    pub fn from_bounds(start: u32, stop: u32) -> Self {
        Self {
            start,
            length: stop.saturating_sub(start),
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last PRB, saturating at `u32::MAX`
    pub fn stop(&self) -> u32 {
        self.start.saturating_add(self.length)
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains(&self, prb: u32) -> bool {
        prb >= self.start && prb < self.stop()
    }

    /// Whether `other` lies entirely inside this interval
    pub fn contains_interval(&self, other: &PrbInterval) -> bool {
        other.start >= self.start && other.stop() <= self.stop()
    }

    /// Common part of two intervals, empty when they are disjoint
    pub fn intersect(&self, other: &PrbInterval) -> PrbInterval {
        let start = self.start.max(other.start);
        let stop = self.stop().min(other.stop());
        PrbInterval::from_bounds(start, stop)
    }

    pub fn overlaps(&self, other: &PrbInterval) -> bool {
        !self.intersect(other).is_empty()
    }
}

impl fmt::Display for PrbInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop())
    }
}

/// PRB occupancy over `[0, size)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrbBitmap {
    words: Vec<u64>,
    size: u32,
}

/// Calls `f(word_index, mask)` for every word touched by `[start, stop)`
fn for_each_word_mask(start: u32, stop: u32, mut f: impl FnMut(usize, u64)) {
    let mut pos = start;
    while pos < stop {
        let bit = pos % WORD_BITS;
        let n = (WORD_BITS - bit).min(stop - pos);
        let mask = if n == WORD_BITS {
            u64::MAX
        } else {
            ((1u64 << n) - 1) << bit
        };
        f((pos / WORD_BITS) as usize, mask);
        pos += n;
    }
}

impl PrbBitmap {
    /// All-zero bitmap of `size` PRBs
    pub fn new(size: u32) -> Self {
        Self {
            words: vec![0; ceil_div(size.max(1), WORD_BITS) as usize],
            size,
        }
    }

    /// Bitmap of `size` PRBs with `interval` marked
    pub fn from_interval(size: u32, interval: &PrbInterval) -> Result<Self, PrbError> {
        let mut bitmap = Self::new(size);
        bitmap.set_range(interval.start(), interval.length())?;
        Ok(bitmap)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// End of `[start, start + len)`, out of range when it does not fit in a `u32`
    fn range_stop(&self, start: u32, len: u32) -> Result<u32, PrbError> {
        start.checked_add(len).ok_or(PrbError::IndexOutOfRange {
            index: start,
            size: self.size,
        })
    }

    fn check_range(&self, start: u32, stop: u32) -> Result<(), PrbError> {
        if start > stop || stop > self.size {
            let index = if start > stop { start } else { stop - 1 };
            return Err(PrbError::IndexOutOfRange {
                index,
                size: self.size,
            });
        }
        Ok(())
    }

    pub fn set(&mut self, index: u32) -> Result<(), PrbError> {
        self.set_range(index, 1)
    }

    pub fn test(&self, index: u32) -> Result<bool, PrbError> {
        let stop = self.range_stop(index, 1)?;
        self.check_range(index, stop)?;
        let word = self.words[(index / WORD_BITS) as usize];
        Ok(word & (1u64 << (index % WORD_BITS)) != 0)
    }

    /// Marks `len` PRBs starting at `start`
    pub fn set_range(&mut self, start: u32, len: u32) -> Result<(), PrbError> {
        let stop = self.range_stop(start, len)?;
        self.check_range(start, stop)?;
        for_each_word_mask(start, stop, |w, mask| self.words[w] |= mask);
        Ok(())
    }

    /// Clears `len` PRBs starting at `start`
    pub fn clear_range(&mut self, start: u32, len: u32) -> Result<(), PrbError> {
        let stop = self.range_stop(start, len)?;
        self.check_range(start, stop)?;
        for_each_word_mask(start, stop, |w, mask| self.words[w] &= !mask);
        Ok(())
    }

    /// Clears the part of `interval` that lies inside the bitmap
    pub fn clear_interval(&mut self, interval: &PrbInterval) {
        let inside = interval.intersect(&PrbInterval::new(0, self.size));
        for_each_word_mask(inside.start(), inside.stop(), |w, mask| self.words[w] &= !mask);
    }

    /// Zeroes every PRB
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Whether any PRB in `[start, stop)` is marked
    pub fn any(&self, start: u32, stop: u32) -> Result<bool, PrbError> {
        self.check_range(start, stop)?;
        let mut found = false;
        for_each_word_mask(start, stop, |w, mask| found |= self.words[w] & mask != 0);
        Ok(found)
    }

    /// Whether any PRB of `interval` is marked
    pub fn any_in(&self, interval: &PrbInterval) -> Result<bool, PrbError> {
        let stop = self.range_stop(interval.start(), interval.length())?;
        self.any(interval.start(), stop)
    }

    pub fn none(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of marked PRBs
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// First index in `[from, to)` whose bit equals `want_set`
    pub fn find_lowest(&self, from: u32, to: u32, want_set: bool) -> Result<Option<u32>, PrbError> {
        self.check_range(from, to)?;
        let mut result = None;
        for_each_word_mask(from, to, |w, mask| {
            if result.is_some() {
                return;
            }
            let word = if want_set { self.words[w] } else { !self.words[w] };
            let hits = word & mask;
            if hits != 0 {
                result = Some(w as u32 * WORD_BITS + hits.trailing_zeros());
            }
        });
        Ok(result)
    }

    /// Whether both bitmaps mark a common PRB
    pub fn intersects(&self, other: &PrbBitmap) -> bool {
        assert_eq!(self.size, other.size, "PRB bitmaps of different size");
        self.words.iter().zip(&other.words).any(|(a, b)| a & b != 0)
    }

    /// PRBs marked in either bitmap
    pub fn union(&self, other: &PrbBitmap) -> PrbBitmap {
        let mut out = self.clone();
        out |= other;
        out
    }

    /// Longest unmarked run at or after `start_hint`, capped at `max_len` PRBs
    pub fn find_empty_interval(&self, max_len: u32, start_hint: u32) -> Option<PrbInterval> {
        let mut best = PrbInterval::default();
        let mut pos = start_hint;
        while pos < self.size && best.length() < max_len {
            let Ok(Some(start)) = self.find_lowest(pos, self.size, false) else {
                break;
            };
            let cap = start.saturating_add(max_len).min(self.size);
            let stop = match self.find_lowest(start, cap, true) {
                Ok(Some(stop)) => stop,
                _ => cap,
            };
            if stop - start > best.length() {
                best = PrbInterval::from_bounds(start, stop);
            }
            pos = stop + 1;
        }
        (!best.is_empty()).then_some(best)
    }

    /// Indices of the marked PRBs in increasing order
    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.size).filter(move |&i| self.words[(i / WORD_BITS) as usize] & (1u64 << (i % WORD_BITS)) != 0)
    }

    fn clear_padding(&mut self) {
        let tail = self.size % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        if self.size == 0 {
            self.words.iter_mut().for_each(|w| *w = 0);
        }
    }
}

impl BitOrAssign<&PrbBitmap> for PrbBitmap {
    fn bitor_assign(&mut self, rhs: &PrbBitmap) {
        assert_eq!(self.size, rhs.size, "PRB bitmaps of different size");
        for (a, b) in self.words.iter_mut().zip(&rhs.words) {
            *a |= b;
        }
    }
}

impl BitOr<&PrbBitmap> for &PrbBitmap {
    type Output = PrbBitmap;

    fn bitor(self, rhs: &PrbBitmap) -> PrbBitmap {
        self.union(rhs)
    }
}

impl BitAnd<&PrbBitmap> for &PrbBitmap {
    type Output = PrbBitmap;

    fn bitand(self, rhs: &PrbBitmap) -> PrbBitmap {
        assert_eq!(self.size, rhs.size, "PRB bitmaps of different size");
        let words = self.words.iter().zip(&rhs.words).map(|(a, b)| a & b).collect();
        PrbBitmap { words, size: self.size }
    }
}

impl Not for PrbBitmap {
    type Output = PrbBitmap;

    fn not(mut self) -> PrbBitmap {
        self.words.iter_mut().for_each(|w| *w = !*w);
        self.clear_padding();
        self
    }
}

impl fmt::Binary for PrbBitmap {
    /// Highest PRB first, like a bitmap field
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.size).rev() {
            let set = self.words[(i / WORD_BITS) as usize] & (1u64 << (i % WORD_BITS)) != 0;
            f.write_str(if set { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Display for PrbBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(self, f)
    }
}

/// rbg-Size selection of PDSCH-Config / PUSCH-Config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RbgSizeConfig {
    #[default]
    Config1,
    Config2,
}

/// RBG partition of a BWP (TS 38.214 5.1.2.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RbgConfig {
    bwp_start: u32,
    bwp_size: u32,
    nominal_size: u32,
    nof_rbg: u32,
}

impl RbgConfig {
    /// Nominal RBG size P (TS 38.214 Table 5.1.2.2.1-1)
    pub fn nominal_rbg_size(bwp_size: u32, config: RbgSizeConfig) -> u32 {
        let (p1, p2) = match bwp_size {
            0..=36 => (2, 4),
            37..=72 => (4, 8),
            73..=144 => (8, 16),
            _ => (16, 16),
        };
        match config {
            RbgSizeConfig::Config1 => p1,
            RbgSizeConfig::Config2 => p2,
        }
    }

    pub fn new(bwp_start: u32, bwp_size: u32, config: RbgSizeConfig) -> Self {
        let p = Self::nominal_rbg_size(bwp_size, config);
        let nof_rbg = ceil_div(bwp_size + bwp_start % p, p);
        Self {
            bwp_start,
            bwp_size,
            nominal_size: p,
            nof_rbg,
        }
    }

    pub fn nominal_size(&self) -> u32 {
        self.nominal_size
    }

    pub fn nof_rbg(&self) -> u32 {
        self.nof_rbg
    }

    /// BWP-relative PRBs covered by RBG `rbg_idx`
    pub fn rbg_prbs(&self, rbg_idx: u32) -> PrbInterval {
        let first_size = self.nominal_size - self.bwp_start % self.nominal_size;
        let start = if rbg_idx == 0 {
            0
        } else {
            first_size + (rbg_idx - 1) * self.nominal_size
        };
        let stop = if rbg_idx == 0 {
            first_size
        } else {
            start + self.nominal_size
        };
        PrbInterval::from_bounds(start.min(self.bwp_size), stop.min(self.bwp_size))
    }
}

/// RBG mask of a type 0 allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RbgBitmap {
    bits: u32,
    nof_rbg: u32,
}

impl RbgBitmap {
    /// Empty mask of `nof_rbg` RBGs, capped at [`MAX_NOF_RBG`]
    pub fn new(nof_rbg: u32) -> Self {
        Self {
            bits: 0,
            nof_rbg: nof_rbg.min(MAX_NOF_RBG),
        }
    }

    pub fn nof_rbg(&self) -> u32 {
        self.nof_rbg
    }

    pub fn set(&mut self, rbg_idx: u32) -> Result<(), PrbError> {
        if rbg_idx >= self.nof_rbg {
            return Err(PrbError::IndexOutOfRange {
                index: rbg_idx,
                size: self.nof_rbg,
            });
        }
        self.bits |= 1 << rbg_idx;
        Ok(())
    }

    pub fn test(&self, rbg_idx: u32) -> bool {
        rbg_idx < self.nof_rbg && self.bits & (1 << rbg_idx) != 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.nof_rbg).filter(move |&i| self.test(i))
    }

    /// DCI bitmap field: RBG 0 maps to the most significant bit
    pub fn to_field(&self) -> u32 {
        self.iter().fold(0, |acc, rbg| acc | 1 << (self.nof_rbg - 1 - rbg))
    }

    /// PRBs covered by the marked RBGs
    pub fn to_prb_bitmap(&self, rbg_cfg: &RbgConfig) -> Result<PrbBitmap, PrbError> {
        if self.nof_rbg != rbg_cfg.nof_rbg() {
            return Err(PrbError::SizeMismatch {
                expected: rbg_cfg.nof_rbg(),
                actual: self.nof_rbg,
            });
        }
        let mut prbs = PrbBitmap::new(rbg_cfg.bwp_size);
        for rbg in self.iter() {
            let interval = rbg_cfg.rbg_prbs(rbg);
            prbs.set_range(interval.start(), interval.length())?;
        }
        Ok(prbs)
    }
}

/// Frequency domain shape of a PDSCH/PUSCH grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrbGrant {
    /// Resource allocation type 0
    Type0(RbgBitmap),
    /// Resource allocation type 1
    Type1(PrbInterval),
}

impl PrbGrant {
    pub fn is_type0(&self) -> bool {
        matches!(self, PrbGrant::Type0(_))
    }

    pub fn is_type1(&self) -> bool {
        matches!(self, PrbGrant::Type1(_))
    }

    /// PRBs of the grant over a BWP described by `rbg_cfg`
    pub fn to_prb_bitmap(&self, rbg_cfg: &RbgConfig) -> Result<PrbBitmap, PrbError> {
        match self {
            PrbGrant::Type0(rbgs) => rbgs.to_prb_bitmap(rbg_cfg),
            PrbGrant::Type1(interval) => PrbBitmap::from_interval(rbg_cfg.bwp_size, interval),
        }
    }
}

impl From<PrbInterval> for PrbGrant {
    fn from(interval: PrbInterval) -> Self {
        PrbGrant::Type1(interval)
    }
}

impl From<RbgBitmap> for PrbGrant {
    fn from(rbgs: RbgBitmap) -> Self {
        PrbGrant::Type0(rbgs)
    }
}

impl fmt::Display for PrbGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrbGrant::Type0(rbgs) => write!(f, "rbgs=0x{:x}", rbgs.to_field()),
            PrbGrant::Type1(interval) => write!(f, "prbs={}", interval),
        }
    }
}
