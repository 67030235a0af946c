//! MAC Scheduler Implementation
//!
//! Drives one [`SchAllocator`] pair per slot of the frame: SIB1 first, then pending
//! random access responses with their Msg3 grant, then UE traffic by first fit.

use super::pdcch_config::{BwpParams, DciFormat, ResourceAllocationType};
use super::prb::{PrbBitmap, PrbGrant, PrbInterval, RbgBitmap, RbgConfig};
use super::sch_allocator::{AllocError, CommittedGrant, SchAllocator, UeCarrierParams, DEFAULT_TIME_DOMAIN_ASSIGNMENT};
use super::time_alloc::default_pusch_time_alloc;
use crate::LayerError;
use common::types::{Rnti, SubcarrierSpacing};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SearchSpace#0 used by SIB1
pub const SIB1_SEARCH_SPACE: u8 = 0;

/// SIB1 broadcast parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sib1SchedConfig {
    /// Periodicity in slots
    pub period_slots: u32,
    /// PRBs requested for the SIB1 PDSCH
    pub nof_prb: u32,
}

/// Simulated UE with constant traffic
#[derive(Debug, Clone)]
pub struct UeSchedConfig {
    pub ue: UeCarrierParams,
    /// Search space used for both DL assignments and UL grants
    pub ss_id: u8,
    pub dl_prbs: u32,
    pub ul_prbs: u32,
    pub dl_format: DciFormat,
}

impl UeSchedConfig {
    /// UL format matching the DL one (fallback or non-fallback)
    pub fn ul_format(&self) -> DciFormat {
        if self.dl_format.is_compact() {
            DciFormat::Format00
        } else {
            DciFormat::Format01
        }
    }
}

/// Random access response waiting for PDSCH resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RarRequest {
    /// Absolute slot (frame * slots_per_frame + slot) from which the RAR may be sent
    pub slot: u32,
    pub ra_rnti: Rnti,
    pub tc_rnti: Rnti,
    pub nof_prb: u32,
    pub msg3_prbs: u32,
}

/// Scheduling result of one slot
#[derive(Debug, Clone)]
pub struct SlotSchedule {
    pub frame: u32,
    pub slot: u32,
    /// PDSCH grants transmitted in this slot
    pub pdsch: Vec<CommittedGrant>,
    /// PUSCH grants received in this slot, granted by earlier DCIs
    pub pusch: Vec<CommittedGrant>,
}

impl SlotSchedule {
    pub fn is_empty(&self) -> bool {
        self.pdsch.is_empty() && self.pusch.is_empty()
    }
}

impl fmt::Display for SlotSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SFN={} slot={}: {} PDSCH, {} PUSCH", self.frame, self.slot, self.pdsch.len(), self.pusch.len())
    }
}

/// Msg3 delay added to K2 (TS 38.214 Table 6.1.2.1.1-5)
fn msg3_delta(scs: SubcarrierSpacing) -> u32 {
    match scs.numerology() {
        0 => 2,
        1 => 3,
        2 => 4,
        _ => 6,
    }
}

/// First-fit type 1 interval of up to `nof_prb` PRBs
fn first_fit_interval(occupied: &PrbBitmap, nof_prb: u32) -> Option<PrbInterval> {
    occupied.find_empty_interval(nof_prb, 0)
}

/// First-fit RBG mask covering at least `nof_prb` PRBs when possible
fn first_fit_rbgs(occupied: &PrbBitmap, rbg: &RbgConfig, nof_prb: u32) -> Option<RbgBitmap> {
    let mut rbgs = RbgBitmap::new(rbg.nof_rbg());
    let mut prbs = 0;
    for idx in 0..rbg.nof_rbg() {
        if prbs >= nof_prb {
            break;
        }
        let range = rbg.rbg_prbs(idx);
        if !occupied.any_in(&range).unwrap_or(true) {
            rbgs.set(idx).ok()?;
            prbs += range.length();
        }
    }
    (rbgs.count() > 0).then_some(rbgs)
}

/// Grant shape for a UE, following its resource allocation type for non-fallback formats
fn ue_grant(
    alloc: &SchAllocator,
    ue: &UeCarrierParams,
    ss_id: u8,
    format: DciFormat,
    ra_type: ResourceAllocationType,
    nof_prb: u32,
) -> Option<PrbGrant> {
    let occupied = alloc.occupied_prbs_for(ss_id, format, Some(ue));
    if !format.is_compact() && ra_type == ResourceAllocationType::Type0 {
        first_fit_rbgs(&occupied, &alloc.bwp().rbg, nof_prb).map(PrbGrant::Type0)
    } else {
        first_fit_interval(&occupied, nof_prb).map(PrbGrant::Type1)
    }
}

/// MAC scheduler
pub struct MacScheduler {
    bwp: Arc<BwpParams>,
    scs: SubcarrierSpacing,
    /// PDSCH allocators indexed by slot within the frame
    pdsch: Vec<SchAllocator>,
    /// PUSCH allocators indexed by slot within the frame
    pusch: Vec<SchAllocator>,
    sib1: Option<Sib1SchedConfig>,
    ues: Vec<UeSchedConfig>,
    pending_rars: VecDeque<RarRequest>,
}

impl MacScheduler {
    /// Create a new MAC scheduler
    pub fn new(bwp: Arc<BwpParams>, scs: SubcarrierSpacing, sib1: Option<Sib1SchedConfig>) -> Result<Self, LayerError> {
        if let Some(cfg) = sib1 {
            if cfg.period_slots == 0 || cfg.nof_prb == 0 {
                return Err(LayerError::InvalidConfiguration(format!("Invalid SIB1 scheduling: {:?}", cfg)));
            }
            if bwp.pdcch.search_space(SIB1_SEARCH_SPACE).is_none() {
                return Err(LayerError::InvalidConfiguration(
                    "SIB1 requires SearchSpace#0".into(),
                ));
            }
        }

        let slots_per_frame = scs.slots_per_frame();
        let pdsch = (0..slots_per_frame).map(|sl| SchAllocator::pdsch(bwp.clone(), sl)).collect();
        let pusch = (0..slots_per_frame).map(|sl| SchAllocator::pusch(bwp.clone(), sl)).collect();
        info!(
            "MAC scheduler: BWP#{} with {} PRBs, {} slots per frame",
            bwp.bwp_id,
            bwp.nof_prb(),
            slots_per_frame
        );

        Ok(Self {
            bwp,
            scs,
            pdsch,
            pusch,
            sib1,
            ues: Vec::new(),
            pending_rars: VecDeque::new(),
        })
    }

    pub fn bwp(&self) -> &BwpParams {
        &self.bwp
    }

    pub fn slots_per_frame(&self) -> u32 {
        self.scs.slots_per_frame()
    }

    /// Register a UE, rejecting UE-specific CORESETs that do not fit the BWP
    pub fn add_ue(&mut self, ue: UeSchedConfig) -> Result<(), LayerError> {
        self.bwp.validate_ue_pdcch(&ue.ue.pdcch)?;
        debug!("Added rnti={} on SearchSpace#{}", ue.ue.rnti, ue.ss_id);
        self.ues.push(ue);
        Ok(())
    }

    pub fn queue_rar(&mut self, rar: RarRequest) {
        self.pending_rars.push_back(rar);
    }

    /// Number of RARs still waiting for resources
    pub fn nof_pending_rars(&self) -> usize {
        self.pending_rars.len()
    }

    /// Schedule one slot and return the grants transmitted in it
    pub fn run_slot(&mut self, frame: u32, slot: u32) -> Result<SlotSchedule, LayerError> {
        let slots_per_frame = self.slots_per_frame();
        if slot >= slots_per_frame {
            return Err(LayerError::InvalidSlot { slot, slots_per_frame });
        }
        let abs_slot = frame * slots_per_frame + slot;
        let k2 = default_pusch_time_alloc(DEFAULT_TIME_DOMAIN_ASSIGNMENT).map_or(1, |t| t.k as u32);
        let ul_slot = (slot + k2) % slots_per_frame;
        let msg3_slot = (slot + k2 + msg3_delta(self.scs)) % slots_per_frame;

        let pdsch = &mut self.pdsch[slot as usize];
        pdsch.reset();
        let is_dl = self.bwp.slot_activity(slot).is_dl;

        // SIB1
        if let Some(sib1) = self.sib1.filter(|cfg| is_dl && abs_slot % cfg.period_slots == 0) {
            let occupied = pdsch.occupied_prbs(SIB1_SEARCH_SPACE, DciFormat::Format10);
            match first_fit_interval(&occupied, sib1.nof_prb) {
                Some(prbs) => match pdsch.alloc_si_pdsch(SIB1_SEARCH_SPACE, prbs.into()) {
                    Ok(grant) => info!("Scheduled SIB1 in frame={}, slot={}: {}", frame, slot, grant),
                    Err(e) => warn!("SIB1 in frame={}, slot={} failed: {}", frame, slot, e),
                },
                None => warn!("No PRBs left for SIB1 in frame={}, slot={}", frame, slot),
            }
        }

        // RAR and Msg3
        if let Some(ra_ss) = self.bwp.pdcch.ra_search_space.filter(|_| is_dl) {
            let mut deferred = VecDeque::new();
            while let Some(rar) = self.pending_rars.pop_front() {
                if rar.slot > abs_slot {
                    deferred.push_back(rar);
                    continue;
                }
                let occupied = pdsch.occupied_prbs(ra_ss, DciFormat::Format10);
                let Some(prbs) = first_fit_interval(&occupied, rar.nof_prb) else {
                    deferred.push_back(rar);
                    continue;
                };
                if let Err(e) = pdsch.alloc_rar_pdsch(rar.ra_rnti, prbs.into()) {
                    debug!("RAR for ra-rnti={} deferred: {}", rar.ra_rnti, e);
                    deferred.push_back(rar);
                    continue;
                }

                let msg3 = &mut self.pusch[msg3_slot as usize];
                let occupied = msg3.occupied_prbs(ra_ss, DciFormat::Format00);
                let result = first_fit_interval(&occupied, rar.msg3_prbs)
                    .ok_or(AllocError::SchCollision)
                    .and_then(|prbs| msg3.alloc_msg3_pusch(rar.tc_rnti, prbs.into()).map(|_| ()));
                match result {
                    Ok(()) => debug!(
                        "Scheduled RAR ra-rnti={} with Msg3 tc-rnti={} in slot={}",
                        rar.ra_rnti, rar.tc_rnti, msg3_slot
                    ),
                    Err(e) => {
                        warn!("Msg3 for tc-rnti={} failed ({}), cancelling RAR", rar.tc_rnti, e);
                        pdsch.cancel_last();
                        deferred.push_back(rar);
                    }
                }
            }
            self.pending_rars = deferred;
        }

        // UE traffic
        for ue in &self.ues {
            if is_dl && ue.dl_prbs > 0 {
                let grant = ue_grant(pdsch, &ue.ue, ue.ss_id, ue.dl_format, ue.ue.pdsch_ra_type, ue.dl_prbs);
                match grant.map(|g| pdsch.alloc_ue(&ue.ue, ue.ss_id, ue.dl_format, g).map(|_| ())) {
                    Some(Ok(())) => {}
                    Some(Err(e)) => debug!("PDSCH for rnti={} skipped: {}", ue.ue.rnti, e),
                    None => debug!("No PDSCH PRBs left for rnti={}", ue.ue.rnti),
                }
            }
            if ue.ul_prbs > 0 {
                let pusch = &mut self.pusch[ul_slot as usize];
                let fmt = ue.ul_format();
                if !pusch.bwp().slot_activity(ul_slot).is_ul {
                    continue;
                }
                let grant = ue_grant(pusch, &ue.ue, ue.ss_id, fmt, ue.ue.pusch_ra_type, ue.ul_prbs);
                match grant.map(|g| pusch.alloc_ue(&ue.ue, ue.ss_id, fmt, g).map(|_| ())) {
                    Some(Ok(())) => {}
                    Some(Err(e)) => debug!("PUSCH for rnti={} skipped: {}", ue.ue.rnti, e),
                    None => debug!("No PUSCH PRBs left for rnti={}", ue.ue.rnti),
                }
            }
        }

        let pusch = &mut self.pusch[slot as usize];
        let schedule = SlotSchedule {
            frame,
            slot,
            pdsch: pdsch.grants().to_vec(),
            pusch: pusch.grants().to_vec(),
        };
        // PUSCH of this slot is complete, free it for the next frame
        pusch.reset();
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::pdcch_config::{BwpConfig, CoresetConfig, PdcchConfig, SearchSpaceConfig, SearchSpaceType};
    use crate::mac::prb::RbgSizeConfig;
    use crate::mac::sch_allocator::{LinkDirection, RntiType};
    use common::types::{DuplexMode, TddPattern};

    fn bwp(duplex: DuplexMode) -> Arc<BwpParams> {
        let mut pdcch = PdcchConfig::default();
        pdcch.add_coreset(CoresetConfig {
            id: 0,
            freq_resources: 0b1111,
            offset_rb: 1,
            duration: 2,
        });
        pdcch.add_coreset(CoresetConfig {
            id: 2,
            freq_resources: 0xFF,
            offset_rb: 0,
            duration: 1,
        });
        for (id, coreset_id, ss_type) in [(0, 0, SearchSpaceType::Common), (1, 0, SearchSpaceType::Common), (2, 2, SearchSpaceType::Ue)] {
            pdcch.add_search_space(SearchSpaceConfig { id, coreset_id, ss_type });
        }
        pdcch.ra_search_space = Some(1);
        let cfg = BwpConfig {
            bwp_id: 0,
            start_rb: 0,
            nof_prb: 52,
            rbg_size: RbgSizeConfig::Config1,
            duplex,
            max_grants_per_slot: 16,
            pdcch,
        };
        Arc::new(BwpParams::new(cfg).unwrap())
    }

    fn ue(rnti: u16, ss_id: u8, dl_format: DciFormat, ra_type: ResourceAllocationType) -> UeSchedConfig {
        let mut ue = UeCarrierParams::new(Rnti(rnti));
        ue.pdsch_ra_type = ra_type;
        UeSchedConfig {
            ue,
            ss_id,
            dl_prbs: 10,
            ul_prbs: 8,
            dl_format,
        }
    }

    #[test]
    fn test_sib1_period() {
        let sib1 = Sib1SchedConfig {
            period_slots: 20,
            nof_prb: 4,
        };
        let mut sched = MacScheduler::new(bwp(DuplexMode::Fdd), SubcarrierSpacing::Scs15, Some(sib1)).unwrap();

        let schedule = sched.run_slot(0, 0).unwrap();
        assert_eq!(schedule.pdsch.len(), 1);
        let sib = &schedule.pdsch[0];
        assert_eq!(sib.ctx.rnti, Rnti::SI);
        // First free PRB inside CORESET#0
        assert_eq!(sib.grant, PrbGrant::Type1(PrbInterval::new(1, 4)));

        assert!(sched.run_slot(1, 0).unwrap().is_empty());
        assert_eq!(sched.run_slot(2, 0).unwrap().pdsch.len(), 1);
    }

    #[test]
    fn test_invalid_slot() {
        let mut sched = MacScheduler::new(bwp(DuplexMode::Fdd), SubcarrierSpacing::Scs30, None).unwrap();
        assert_eq!(sched.slots_per_frame(), 20);
        assert!(sched.run_slot(0, 19).is_ok());
        assert!(matches!(sched.run_slot(0, 20), Err(LayerError::InvalidSlot { slot: 20, .. })));
    }

    #[test]
    fn test_rar_with_msg3() {
        let mut sched = MacScheduler::new(bwp(DuplexMode::Fdd), SubcarrierSpacing::Scs15, None).unwrap();
        sched.queue_rar(RarRequest {
            slot: 1,
            ra_rnti: Rnti(0x10),
            tc_rnti: Rnti(0x4601),
            nof_prb: 4,
            msg3_prbs: 3,
        });

        assert!(sched.run_slot(0, 0).unwrap().is_empty());
        assert_eq!(sched.nof_pending_rars(), 1);

        let schedule = sched.run_slot(0, 1).unwrap();
        assert_eq!(sched.nof_pending_rars(), 0);
        assert_eq!(schedule.pdsch.len(), 1);
        assert_eq!(schedule.pdsch[0].ctx.rnti_type, RntiType::Ra);

        // Msg3 is received K2 + delta slots later
        for slot in 2..4 {
            assert!(sched.run_slot(0, slot).unwrap().pusch.is_empty());
        }
        let schedule = sched.run_slot(0, 4).unwrap();
        assert_eq!(schedule.pusch.len(), 1);
        let msg3 = &schedule.pusch[0];
        assert_eq!(msg3.direction, LinkDirection::Uplink);
        assert_eq!(msg3.ctx.rnti, Rnti(0x4601));
        assert_eq!(msg3.grant, PrbGrant::Type1(PrbInterval::new(0, 3)));
    }

    #[test]
    fn test_rar_cancelled_when_msg3_slot_is_not_uplink() {
        // Msg3 of a RAR sent in slot 0 falls in slot 3, the special slot of DDDSU
        let tdd = DuplexMode::Tdd(TddPattern {
            period_slots: 5,
            dl_slots: 3,
            special_slots: 1,
            ul_slots: 1,
        });
        let mut sched = MacScheduler::new(bwp(tdd), SubcarrierSpacing::Scs15, None).unwrap();
        sched.queue_rar(RarRequest {
            slot: 0,
            ra_rnti: Rnti(0x10),
            tc_rnti: Rnti(0x4601),
            nof_prb: 4,
            msg3_prbs: 3,
        });

        let schedule = sched.run_slot(0, 0).unwrap();
        assert!(schedule.pdsch.is_empty());
        assert_eq!(sched.nof_pending_rars(), 1);

        // RAR in slot 1 targets UL slot 4
        let schedule = sched.run_slot(0, 1).unwrap();
        assert_eq!(schedule.pdsch.len(), 1);
        assert_eq!(sched.nof_pending_rars(), 0);
    }

    #[test]
    fn test_ue_first_fit() {
        let mut sched = MacScheduler::new(bwp(DuplexMode::Fdd), SubcarrierSpacing::Scs15, None).unwrap();
        sched.add_ue(ue(0x4601, 1, DciFormat::Format10, ResourceAllocationType::Type1)).unwrap();
        sched.add_ue(ue(0x4602, 2, DciFormat::Format11, ResourceAllocationType::Type0)).unwrap();

        let schedule = sched.run_slot(0, 0).unwrap();
        assert_eq!(schedule.pdsch.len(), 2);
        // Common search space keeps the first UE inside CORESET#0
        assert_eq!(schedule.pdsch[0].grant, PrbGrant::Type1(PrbInterval::new(1, 10)));
        // RBGs 0 to 2 overlap the first grant
        let rbgs: Vec<u32> = match schedule.pdsch[1].grant {
            PrbGrant::Type0(rbgs) => rbgs.iter().collect(),
            PrbGrant::Type1(_) => panic!("expected a type 0 grant"),
        };
        assert_eq!(rbgs, vec![3, 4, 5]);
        assert!(!schedule.pdsch[0].prbs.intersects(&schedule.pdsch[1].prbs));

        // UL grants of slot 0 are received in slot 1
        let schedule = sched.run_slot(0, 1).unwrap();
        assert_eq!(schedule.pusch.len(), 2);
        assert_eq!(schedule.pusch[0].grant, PrbGrant::Type1(PrbInterval::new(0, 8)));
        assert_eq!(schedule.pusch[1].grant, PrbGrant::Type1(PrbInterval::new(8, 8)));
    }

    #[test]
    fn test_ue_specific_coreset() {
        let mut sched = MacScheduler::new(bwp(DuplexMode::Fdd), SubcarrierSpacing::Scs15, None).unwrap();
        let mut cfg = ue(0x4601, 5, DciFormat::Format10, ResourceAllocationType::Type1);
        cfg.ue.pdcch.add_coreset(CoresetConfig {
            id: 1,
            freq_resources: 0b11,
            offset_rb: 30,
            duration: 1,
        });
        cfg.ue.pdcch.add_search_space(SearchSpaceConfig {
            id: 5,
            coreset_id: 1,
            ss_type: SearchSpaceType::Common,
        });

        let mut too_wide = cfg.clone();
        too_wide.ue.pdcch.add_coreset(CoresetConfig {
            id: 1,
            freq_resources: 0b11,
            offset_rb: 48,
            duration: 1,
        });
        assert!(sched.add_ue(too_wide).is_err());

        sched.add_ue(cfg).unwrap();
        let schedule = sched.run_slot(0, 0).unwrap();
        assert_eq!(schedule.pdsch.len(), 1);
        assert_eq!(schedule.pdsch[0].grant, PrbGrant::Type1(PrbInterval::new(30, 10)));
    }

    #[test]
    fn test_sib1_requires_search_space0() {
        let mut cfg = (*bwp(DuplexMode::Fdd)).clone();
        cfg.pdcch = PdcchConfig::default();
        let sib1 = Sib1SchedConfig {
            period_slots: 20,
            nof_prb: 4,
        };
        assert!(MacScheduler::new(Arc::new(cfg), SubcarrierSpacing::Scs15, Some(sib1)).is_err());
    }
}
