//! Common Types for 5G GNodeB
//!
//! Defines fundamental types shared by the MAC scheduler and the tools built on it

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System Information RNTI (TS 38.321 Table 7.1-1)
    pub const SI: Self = Self(0xFFFF);
    /// Paging RNTI
    pub const P: Self = Self(0xFFFE);
    /// Highest RA-RNTI value (TS 38.321 5.1.3, s_id=13 t_id=79 f_id=7 ul_carrier_id=1)
    pub const RA_MAX: u16 = 0x4600;

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether this value can only be an RA-RNTI
    pub fn is_ra(&self) -> bool {
        (1..=Self::RA_MAX).contains(&self.0)
    }
}

impl std::fmt::Display for Rnti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Parse a spacing given in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::from_u32(khz)
    }

    /// Numerology index mu
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 << self.numerology()
    }

    /// Slot duration in microseconds (240 kHz is rounded down from 62.5)
    pub fn slot_duration_us(&self) -> u32 {
        1000 >> self.numerology()
    }
}

/// TDD UL/DL pattern (TS 38.331 TDD-UL-DL-Pattern), counted in slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    /// Pattern periodicity in slots
    pub period_slots: u32,
    /// Full downlink slots at the start of the period
    pub dl_slots: u32,
    /// Mixed slots following the downlink slots
    pub special_slots: u32,
    /// Full uplink slots at the end of the period
    pub ul_slots: u32,
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd(TddPattern),
}

/// Per-slot link activity derived from the duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotActivity {
    /// PDSCH may be scheduled
    pub is_dl: bool,
    /// PUSCH may be scheduled
    pub is_ul: bool,
}

impl DuplexMode {
    /// Link activity of slot `slot_idx` within the pattern
    pub fn slot_activity(&self, slot_idx: u32) -> SlotActivity {
        match self {
            DuplexMode::Fdd => SlotActivity { is_dl: true, is_ul: true },
            DuplexMode::Tdd(pattern) => {
                let slot = slot_idx % pattern.period_slots.max(1);
                let dl_end = pattern.dl_slots + pattern.special_slots;
                let ul_start = pattern.period_slots.saturating_sub(pattern.ul_slots);
                SlotActivity {
                    is_dl: slot < dl_end,
                    is_ul: slot >= ul_start,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_scs_numerology() {
        assert_eq!(SubcarrierSpacing::from_khz(30), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::from_khz(45), None);
        assert_eq!(SubcarrierSpacing::Scs15.slots_per_frame(), 10);
        assert_eq!(SubcarrierSpacing::Scs120.slots_per_frame(), 80);
        assert_eq!(SubcarrierSpacing::Scs30.slot_duration_us(), 500);
    }

    #[test]
    fn test_rnti_kinds() {
        assert!(Rnti(0x2).is_ra());
        assert!(!Rnti::SI.is_ra());
        assert!(!Rnti(0x4601).is_ra());
        assert_eq!(Rnti(0x4601).to_string(), "0x4601");
    }

    #[test]
    fn test_tdd_slot_activity() {
        // DDDSU
        let tdd = DuplexMode::Tdd(TddPattern {
            period_slots: 5,
            dl_slots: 3,
            special_slots: 1,
            ul_slots: 1,
        });
        let dl: Vec<bool> = (0..10).map(|s| tdd.slot_activity(s).is_dl).collect();
        let ul: Vec<bool> = (0..10).map(|s| tdd.slot_activity(s).is_ul).collect();
        assert_eq!(dl, [true, true, true, true, false, true, true, true, true, false]);
        assert_eq!(ul, [false, false, false, false, true, false, false, false, false, true]);

        let fdd = DuplexMode::Fdd.slot_activity(7);
        assert!(fdd.is_dl && fdd.is_ul);
    }
}
