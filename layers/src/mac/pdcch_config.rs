//! CORESET, Search Space and BWP parameters used by the shared channel allocator
//!
//! Besides holding the configuration, this module resolves the PRB window in which a
//! PDSCH scheduled from a given search space and DCI format may be placed
//! (3GPP TS 38.214 5.1.2.2.2) and the domain over which its RIV is computed.

use super::prb::{PrbBitmap, PrbGrant, PrbInterval, RbgConfig, RbgSizeConfig, MAX_NOF_PRB};
use crate::LayerError;
use common::types::{DuplexMode, SlotActivity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use tracing::debug;

/// PRBs per CORESET frequency domain resource group
pub const NOF_PRB_PER_CORESET_GROUP: u32 = 6;
/// Length of the frequencyDomainResources bit string
pub const MAX_CORESET_FREQ_GROUPS: u32 = 45;

/// DCI formats handled by the shared channel allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DciFormat {
    /// Fallback uplink grant
    #[serde(rename = "0_0")]
    Format00,
    /// Non-fallback uplink grant
    #[serde(rename = "0_1")]
    Format01,
    /// Fallback downlink assignment
    #[serde(rename = "1_0")]
    Format10,
    /// Non-fallback downlink assignment
    #[serde(rename = "1_1")]
    Format11,
}

impl DciFormat {
    /// Fallback formats only support resource allocation type 1
    pub fn is_compact(&self) -> bool {
        matches!(self, DciFormat::Format00 | DciFormat::Format10)
    }

    pub fn is_downlink(&self) -> bool {
        matches!(self, DciFormat::Format10 | DciFormat::Format11)
    }
}

/// Search space type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSpaceType {
    Common,
    Ue,
}

impl SearchSpaceType {
    pub fn is_common(&self) -> bool {
        matches!(self, SearchSpaceType::Common)
    }
}

/// resourceAllocation of PDSCH-Config / PUSCH-Config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAllocationType {
    Type0,
    #[default]
    Type1,
    DynamicSwitch,
}

impl ResourceAllocationType {
    /// Whether a grant of this shape may be signalled with a non-fallback DCI
    pub fn allows(&self, grant: &PrbGrant) -> bool {
        match self {
            ResourceAllocationType::Type0 => grant.is_type0(),
            ResourceAllocationType::Type1 => grant.is_type1(),
            ResourceAllocationType::DynamicSwitch => true,
        }
    }
}

/// CORESET#0 configuration based on 3GPP TS 38.213
#[derive(Debug, Clone)]
pub struct Coreset0Config {
    /// Number of resource blocks
    pub num_rbs: u32,
    /// Number of symbols
    pub num_symbols: u32,
    /// RB offset, used as the BWP-relative start of CORESET#0
    pub rb_offset: u32,
}

impl Coreset0Config {
    /// Get CORESET#0 configuration from table index
    /// Based on 3GPP TS 38.213 Table 13-1 for {15, 15} kHz SCS
    pub fn from_index(index: u8) -> Result<Self, LayerError> {
        let (num_rbs, num_symbols, rb_offset) = match index {
            0 => (24, 2, 0),
            1 => (24, 2, 2),
            2 => (24, 2, 4),
            3 => (24, 3, 0),
            4 => (24, 3, 2),
            5 => (24, 3, 4),
            6 => (48, 1, 12),
            7 => (48, 1, 16),
            8 => (48, 2, 12),
            9 => (48, 2, 16),
            10 => (48, 3, 12),
            11 => (48, 3, 16),
            12 => (96, 1, 38),
            13 => (96, 2, 38),
            14 => (96, 3, 38),
            _ => {
                return Err(LayerError::InvalidConfiguration(format!(
                    "Invalid CORESET#0 index: {}",
                    index
                )))
            }
        };
        Ok(Self {
            num_rbs,
            num_symbols,
            rb_offset,
        })
    }

    /// CORESET#0 as a generic CORESET description
    pub fn to_coreset(&self) -> CoresetConfig {
        let nof_groups = self.num_rbs / NOF_PRB_PER_CORESET_GROUP;
        CoresetConfig {
            id: 0,
            freq_resources: (1u64 << nof_groups) - 1,
            offset_rb: self.rb_offset,
            duration: self.num_symbols as u8,
        }
    }
}

/// ControlResourceSet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoresetConfig {
    pub id: u8,
    /// Bit `i` set when 6-PRB group `i` belongs to the CORESET
    pub freq_resources: u64,
    /// BWP-relative PRB of group 0
    pub offset_rb: u32,
    /// Duration in symbols (1..=3), no effect on the PRB window
    pub duration: u8,
}

impl CoresetConfig {
    /// Parse a frequencyDomainResources bit string, leftmost bit being group 0
    pub fn parse_freq_resources(bits: &str) -> Result<u64, LayerError> {
        if bits.len() > MAX_CORESET_FREQ_GROUPS as usize {
            return Err(LayerError::InvalidConfiguration(format!(
                "CORESET frequency resources longer than {} groups: {}",
                MAX_CORESET_FREQ_GROUPS,
                bits.len()
            )));
        }
        bits.chars().enumerate().try_fold(0u64, |acc, (i, c)| match c {
            '1' => Ok(acc | 1 << i),
            '0' => Ok(acc),
            other => Err(LayerError::InvalidConfiguration(format!(
                "Invalid character '{}' in CORESET frequency resources",
                other
            ))),
        })
    }

    /// Number of PRBs spanned by the active groups
    pub fn bandwidth(&self) -> u32 {
        self.freq_resources.count_ones() * NOF_PRB_PER_CORESET_GROUP
    }

    /// First PRB of the CORESET
    pub fn start_rb(&self) -> u32 {
        let first_group = if self.freq_resources == 0 {
            0
        } else {
            self.freq_resources.trailing_zeros()
        };
        self.offset_rb + first_group * NOF_PRB_PER_CORESET_GROUP
    }

    /// One past the last PRB of the CORESET
    pub fn stop_rb(&self) -> u32 {
        let end_group = u64::BITS - self.freq_resources.leading_zeros();
        self.offset_rb + end_group * NOF_PRB_PER_CORESET_GROUP
    }
}

/// SearchSpace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSpaceConfig {
    pub id: u8,
    pub coreset_id: u8,
    pub ss_type: SearchSpaceType,
}

/// PDCCH-ConfigCommon or PDCCH-Config contents relevant to PRB allocation
#[derive(Debug, Clone, Default)]
pub struct PdcchConfig {
    coresets: HashMap<u8, CoresetConfig>,
    search_spaces: HashMap<u8, SearchSpaceConfig>,
    /// ra-SearchSpace
    pub ra_search_space: Option<u8>,
}

impl PdcchConfig {
    pub fn add_coreset(&mut self, coreset: CoresetConfig) {
        self.coresets.insert(coreset.id, coreset);
    }

    pub fn add_search_space(&mut self, ss: SearchSpaceConfig) {
        self.search_spaces.insert(ss.id, ss);
    }

    pub fn coreset(&self, id: u8) -> Option<&CoresetConfig> {
        self.coresets.get(&id)
    }

    pub fn search_space(&self, id: u8) -> Option<&SearchSpaceConfig> {
        self.search_spaces.get(&id)
    }

    pub fn coresets(&self) -> impl Iterator<Item = &CoresetConfig> {
        self.coresets.values()
    }

    pub fn search_spaces(&self) -> impl Iterator<Item = &SearchSpaceConfig> {
        self.search_spaces.values()
    }
}

/// Parameters used to build a [`BwpParams`]
#[derive(Debug, Clone)]
pub struct BwpConfig {
    pub bwp_id: u8,
    /// First CRB of the BWP
    pub start_rb: u32,
    pub nof_prb: u32,
    pub rbg_size: RbgSizeConfig,
    pub duplex: DuplexMode,
    /// Capacity of each slot's PDSCH and PUSCH lists
    pub max_grants_per_slot: usize,
    pub pdcch: PdcchConfig,
}

/// Search space resolved against its CORESET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSearchSpace {
    pub ss_id: u8,
    pub ss_type: SearchSpaceType,
    pub coreset_id: u8,
    pub coreset_start_rb: u32,
    pub coreset_bandwidth: u32,
}

impl ResolvedSearchSpace {
    /// PRBs of the CORESET the search space is mapped to
    pub fn coreset_prbs(&self) -> PrbInterval {
        PrbInterval::new(self.coreset_start_rb, self.coreset_bandwidth)
    }
}

fn validate_coreset(cs: &CoresetConfig, nof_prb: u32) -> Result<(), LayerError> {
    if cs.bandwidth() == 0 {
        return Err(LayerError::InvalidConfiguration(format!(
            "CORESET#{} has no frequency resources",
            cs.id
        )));
    }
    if cs.stop_rb() > nof_prb {
        return Err(LayerError::InvalidConfiguration(format!(
            "CORESET#{} PRBs [{}, {}) exceed BWP width {}",
            cs.id,
            cs.start_rb(),
            cs.stop_rb(),
            nof_prb
        )));
    }
    Ok(())
}

/// Checks CORESET widths and search space references; `cell` supplies the CORESETs a
/// UE-specific configuration may refer to without defining them
fn validate_pdcch(pdcch: &PdcchConfig, nof_prb: u32, cell: Option<&PdcchConfig>) -> Result<(), LayerError> {
    for cs in pdcch.coresets() {
        validate_coreset(cs, nof_prb)?;
    }
    for ss in pdcch.search_spaces() {
        let known = pdcch.coreset(ss.coreset_id).is_some()
            || cell.is_some_and(|c| c.coreset(ss.coreset_id).is_some());
        if !known {
            return Err(LayerError::InvalidConfiguration(format!(
                "SearchSpace#{} refers to missing CORESET#{}",
                ss.id, ss.coreset_id
            )));
        }
    }
    Ok(())
}

/// Validated per-BWP scheduling parameters, shared by every slot allocator of the BWP
#[derive(Debug, Clone)]
pub struct BwpParams {
    pub bwp_id: u8,
    pub start_rb: u32,
    nof_prb: NonZeroU32,
    pub rbg: RbgConfig,
    pub duplex: DuplexMode,
    pub max_grants_per_slot: usize,
    pub pdcch: PdcchConfig,
}

impl BwpParams {
    pub fn new(cfg: BwpConfig) -> Result<Self, LayerError> {
        let nof_prb = NonZeroU32::new(cfg.nof_prb)
            .filter(|n| n.get() <= MAX_NOF_PRB)
            .ok_or_else(|| {
                LayerError::InvalidConfiguration(format!("Invalid BWP width: {} PRBs", cfg.nof_prb))
            })?;

        if cfg.max_grants_per_slot == 0 {
            return Err(LayerError::InvalidConfiguration(
                "max_grants_per_slot must be positive".into(),
            ));
        }
        if let DuplexMode::Tdd(pattern) = cfg.duplex {
            if pattern.period_slots == 0
                || pattern.dl_slots + pattern.special_slots + pattern.ul_slots > pattern.period_slots
            {
                return Err(LayerError::InvalidConfiguration(format!(
                    "Invalid TDD pattern: {:?}",
                    pattern
                )));
            }
        }

        validate_pdcch(&cfg.pdcch, nof_prb.get(), None)?;
        if let Some(ra_ss) = cfg.pdcch.ra_search_space {
            if cfg.pdcch.search_space(ra_ss).is_none() {
                return Err(LayerError::InvalidConfiguration(format!(
                    "ra-SearchSpace#{} is not configured",
                    ra_ss
                )));
            }
        }

        let rbg = RbgConfig::new(cfg.start_rb, nof_prb.get(), cfg.rbg_size);
        debug!(
            "BWP#{}: {} PRBs from CRB {}, RBG size {} ({} RBGs)",
            cfg.bwp_id,
            nof_prb,
            cfg.start_rb,
            rbg.nominal_size(),
            rbg.nof_rbg()
        );

        Ok(Self {
            bwp_id: cfg.bwp_id,
            start_rb: cfg.start_rb,
            nof_prb,
            rbg,
            duplex: cfg.duplex,
            max_grants_per_slot: cfg.max_grants_per_slot,
            pdcch: cfg.pdcch,
        })
    }

    pub fn nof_prb(&self) -> u32 {
        self.nof_prb.get()
    }

    /// Whole BWP as a PRB interval
    pub fn bwp_prbs(&self) -> PrbInterval {
        PrbInterval::new(0, self.nof_prb.get())
    }

    /// DL/UL activity of a slot
    pub fn slot_activity(&self, slot_idx: u32) -> SlotActivity {
        self.duplex.slot_activity(slot_idx)
    }

    /// PRBs of a cell CORESET
    pub fn coreset_prb_range(&self, coreset_id: u8) -> Option<PrbInterval> {
        self.pdcch
            .coreset(coreset_id)
            .map(|cs| PrbInterval::new(cs.start_rb(), cs.bandwidth()))
    }

    /// Checks a UE-specific PDCCH-Config against this BWP
    pub fn validate_ue_pdcch(&self, ue_pdcch: &PdcchConfig) -> Result<(), LayerError> {
        validate_pdcch(ue_pdcch, self.nof_prb(), Some(&self.pdcch))
    }

    /// Look up a search space and its CORESET, preferring the UE-specific PDCCH-Config
    ///
    /// A UE CORESET shadows the cell CORESET with the same id. CORESETs that do not fit
    /// the BWP resolve to nothing.
    pub fn resolve_search_space(
        &self,
        ss_id: u8,
        ue_pdcch: Option<&PdcchConfig>,
    ) -> Option<ResolvedSearchSpace> {
        let lookup = |pdcch: &PdcchConfig| {
            let ss = pdcch.search_space(ss_id)?;
            let cs = pdcch
                .coreset(ss.coreset_id)
                .or_else(|| self.pdcch.coreset(ss.coreset_id))?;
            if validate_coreset(cs, self.nof_prb()).is_err() {
                debug!("CORESET#{} of SearchSpace#{} does not fit the BWP", cs.id, ss_id);
                return None;
            }
            Some(ResolvedSearchSpace {
                ss_id,
                ss_type: ss.ss_type,
                coreset_id: ss.coreset_id,
                coreset_start_rb: cs.start_rb(),
                coreset_bandwidth: cs.bandwidth(),
            })
        };
        ue_pdcch.and_then(lookup).or_else(|| lookup(&self.pdcch))
    }

    /// PRB window of a DCI 1_0 PDSCH scheduled from the common search space `ss`
    pub fn dci_fmt_1_0_prb_limits(&self, ss: &ResolvedSearchSpace) -> PrbInterval {
        ss.coreset_prbs().intersect(&self.bwp_prbs())
    }

    /// PRB window available to a grant, the whole BWP unless the fallback DL format is
    /// used from a common search space
    pub fn prb_limits(&self, ss: &ResolvedSearchSpace, dci_format: DciFormat) -> PrbInterval {
        if ss.ss_type.is_common() && dci_format == DciFormat::Format10 {
            self.dci_fmt_1_0_prb_limits(ss)
        } else {
            self.bwp_prbs()
        }
    }

    /// PRBs that may not be used: everything outside [`Self::prb_limits`]
    pub fn excluded_prbs(&self, ss: &ResolvedSearchSpace, dci_format: DciFormat) -> PrbBitmap {
        let mut excluded = !PrbBitmap::new(self.nof_prb());
        excluded.clear_interval(&self.prb_limits(ss, dci_format));
        excluded
    }

    /// Domain size and reference PRB of the type 1 RIV
    ///
    /// DCI 1_0 in a common search space counts PRBs from the CORESET start; the domain
    /// is the CORESET#0 bandwidth when CORESET#0 is used and the BWP otherwise.
    pub fn riv_domain(&self, ss: &ResolvedSearchSpace, dci_format: DciFormat) -> (NonZeroU32, u32) {
        if !(ss.ss_type.is_common() && dci_format == DciFormat::Format10) {
            return (self.nof_prb, 0);
        }
        let domain = if ss.coreset_id == 0 {
            NonZeroU32::new(ss.coreset_bandwidth).unwrap_or(self.nof_prb)
        } else {
            self.nof_prb
        };
        (domain, ss.coreset_start_rb)
    }
}
