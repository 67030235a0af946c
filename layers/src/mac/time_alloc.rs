//! Time domain resource allocation
//!
//! Default PDSCH time domain allocation A for normal CP (3GPP TS 38.214 Table 5.1.2.1.1-2,
//! dmrs-TypeA-Position = pos2) and the default PUSCH table A (Table 6.1.2.1.1-2, j = 1).

use super::sliv::time_sliv;

/// PDSCH/PUSCH mapping type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    /// Slot based
    TypeA,
    /// Mini-slot based
    TypeB,
}

/// One row of a time domain resource allocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDomainAllocation {
    /// Slot offset between the DCI and the scheduled PDSCH (K0) or PUSCH (K2)
    pub k: u8,
    pub mapping: MappingType,
    /// Starting symbol (S)
    pub start_symbol: u8,
    /// Number of symbols (L)
    pub nof_symbols: u8,
}

impl TimeDomainAllocation {
    /// startSymbolAndLength as carried in PDSCH-TimeDomainResourceAllocation
    pub fn sliv(&self) -> u32 {
        time_sliv(self.start_symbol as u32, self.nof_symbols as u32)
    }
}

const fn row(k: u8, mapping: MappingType, start_symbol: u8, nof_symbols: u8) -> TimeDomainAllocation {
    TimeDomainAllocation {
        k,
        mapping,
        start_symbol,
        nof_symbols,
    }
}

use MappingType::{TypeA, TypeB};

const DEFAULT_PDSCH_TABLE_A: [TimeDomainAllocation; 16] = [
    row(0, TypeA, 2, 12),
    row(0, TypeA, 2, 10),
    row(0, TypeA, 2, 9),
    row(0, TypeA, 2, 7),
    row(0, TypeA, 2, 5),
    row(0, TypeB, 9, 4),
    row(0, TypeB, 4, 4),
    row(0, TypeB, 5, 7),
    row(0, TypeB, 5, 2),
    row(0, TypeB, 9, 2),
    row(0, TypeB, 12, 2),
    row(0, TypeA, 1, 13),
    row(0, TypeA, 1, 6),
    row(0, TypeA, 2, 4),
    row(0, TypeB, 4, 7),
    row(0, TypeB, 8, 4),
];

const DEFAULT_PUSCH_TABLE_A: [TimeDomainAllocation; 16] = [
    row(1, TypeA, 0, 14),
    row(1, TypeA, 0, 12),
    row(1, TypeA, 0, 10),
    row(1, TypeB, 2, 10),
    row(1, TypeB, 4, 10),
    row(1, TypeB, 4, 8),
    row(1, TypeB, 4, 6),
    row(2, TypeA, 0, 14),
    row(2, TypeA, 0, 12),
    row(2, TypeA, 0, 10),
    row(3, TypeA, 0, 14),
    row(3, TypeA, 0, 12),
    row(3, TypeA, 0, 10),
    row(1, TypeB, 8, 6),
    row(4, TypeA, 0, 14),
    row(4, TypeA, 0, 10),
];

/// Row `index` (0-based) of the default PDSCH table A
pub fn default_pdsch_time_alloc(index: u8) -> Option<TimeDomainAllocation> {
    DEFAULT_PDSCH_TABLE_A.get(index as usize).copied()
}

/// Row `index` (0-based) of the default PUSCH table A
pub fn default_pusch_time_alloc(index: u8) -> Option<TimeDomainAllocation> {
    DEFAULT_PUSCH_TABLE_A.get(index as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::sliv::time_sliv_to_s_and_l;

    #[test]
    fn test_default_pdsch_rows() {
        let first = default_pdsch_time_alloc(0).unwrap();
        assert_eq!((first.k, first.mapping), (0, MappingType::TypeA));
        assert_eq!((first.start_symbol, first.nof_symbols), (2, 12));
        assert_eq!(first.sliv(), 53);
        assert!(default_pdsch_time_alloc(16).is_none());
    }

    #[test]
    fn test_rows_fit_in_slot() {
        for alloc in DEFAULT_PDSCH_TABLE_A.iter().chain(DEFAULT_PUSCH_TABLE_A.iter()) {
            assert!(alloc.start_symbol + alloc.nof_symbols <= 14, "{:?}", alloc);
            let (s, l) = time_sliv_to_s_and_l(alloc.sliv());
            assert_eq!((s, l), (alloc.start_symbol as u32, alloc.nof_symbols as u32));
        }
        assert_eq!(default_pusch_time_alloc(0).unwrap().sliv(), 27);
    }
}
