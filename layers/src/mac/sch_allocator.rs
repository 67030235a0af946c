//! PDSCH/PUSCH PRB allocator
//!
//! One [`SchAllocator`] exists per BWP, link direction and slot. It owns the slot's PRB
//! occupancy and its list of committed grants, checks every candidate grant against the
//! search space, DCI format and previous allocations, and fills the DCI frequency and
//! time domain assignment fields of the grants it commits.
//!
//! Validation failures are returned as [`AllocError`]; deciding what to do next is up to
//! the caller.

use super::pdcch_config::{BwpParams, DciFormat, PdcchConfig, ResolvedSearchSpace, ResourceAllocationType, SearchSpaceType};
use super::prb::{PrbBitmap, PrbGrant};
use super::sliv::ra_type1_riv;
use super::time_alloc::{default_pdsch_time_alloc, default_pusch_time_alloc, TimeDomainAllocation};
use common::types::Rnti;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Time domain assignment used for every new grant
pub const DEFAULT_TIME_DOMAIN_ASSIGNMENT: u8 = 0;

/// Reasons for rejecting a grant
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("Link direction is not active in this slot")]
    InactiveSlot,

    #[error("No space left in the slot grant list")]
    NoSchSpace,

    #[error("Search space or CORESET not configured")]
    InvalidSearchSpace,

    #[error("Grant incompatible with DCI format or search space")]
    InvalidGrantParams,

    #[error("PRBs collide with previous allocations or CORESET limits")]
    SchCollision,
}

/// Link direction served by an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// PDSCH
    Downlink,
    /// PUSCH
    Uplink,
}

/// RNTI type used to scramble the DCI CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RntiType {
    Si,
    Ra,
    Tc,
    C,
}

/// Search space and format context of a committed DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciContext {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub format: DciFormat,
    pub ss_id: u8,
    pub ss_type: SearchSpaceType,
    pub coreset_id: u8,
    pub coreset_start_rb: u32,
    pub coreset_bandwidth: u32,
}

impl DciContext {
    pub fn new(ss: &ResolvedSearchSpace, format: DciFormat, rnti: Rnti, rnti_type: RntiType) -> Self {
        Self {
            rnti,
            rnti_type,
            format,
            ss_id: ss.ss_id,
            ss_type: ss.ss_type,
            coreset_id: ss.coreset_id,
            coreset_start_rb: ss.coreset_start_rb,
            coreset_bandwidth: ss.coreset_bandwidth,
        }
    }

    /// Search space the DCI was sent from
    pub fn search_space(&self) -> ResolvedSearchSpace {
        ResolvedSearchSpace {
            ss_id: self.ss_id,
            ss_type: self.ss_type,
            coreset_id: self.coreset_id,
            coreset_start_rb: self.coreset_start_rb,
            coreset_bandwidth: self.coreset_bandwidth,
        }
    }
}

/// Frequency and time domain fields handed to DCI packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciGrantFields {
    /// Row of the time domain resource allocation table
    pub time_domain_assignment: u8,
    /// RIV for type 1, RBG bitmap for type 0
    pub freq_domain_assignment: u32,
}

/// Grant committed in a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedGrant {
    pub slot_idx: u32,
    pub direction: LinkDirection,
    pub ctx: DciContext,
    pub grant: PrbGrant,
    /// BWP-relative PRBs taken by the grant
    pub prbs: PrbBitmap,
    pub dci: DciGrantFields,
    /// Symbols and slot offset of the selected time domain row
    pub time_alloc: TimeDomainAllocation,
}

impl CommittedGrant {
    /// Select another row of the default time domain table
    pub fn set_time_domain_assignment(&mut self, index: u8) -> Result<(), AllocError> {
        let row = match self.direction {
            LinkDirection::Downlink => default_pdsch_time_alloc(index),
            LinkDirection::Uplink => default_pusch_time_alloc(index),
        };
        self.time_alloc = row.ok_or(AllocError::InvalidGrantParams)?;
        self.dci.time_domain_assignment = index;
        Ok(())
    }
}

impl fmt::Display for CommittedGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ch = match self.direction {
            LinkDirection::Downlink => "PDSCH",
            LinkDirection::Uplink => "PUSCH",
        };
        write!(
            f,
            "{} rnti={} ss={} {} f_alloc={} t_alloc={}",
            ch, self.ctx.rnti, self.ctx.ss_id, self.grant, self.dci.freq_domain_assignment, self.dci.time_domain_assignment
        )
    }
}

/// UE carrier configuration relevant to PRB allocation
#[derive(Debug, Clone)]
pub struct UeCarrierParams {
    pub rnti: Rnti,
    /// UE-specific PDCCH-Config, searched before the cell configuration
    pub pdcch: PdcchConfig,
    pub pdsch_ra_type: ResourceAllocationType,
    pub pusch_ra_type: ResourceAllocationType,
}

impl UeCarrierParams {
    /// UE that only uses the cell search spaces and type 1 allocations
    pub fn new(rnti: Rnti) -> Self {
        Self {
            rnti,
            pdcch: PdcchConfig::default(),
            pdsch_ra_type: ResourceAllocationType::Type1,
            pusch_ra_type: ResourceAllocationType::Type1,
        }
    }

    fn ra_type(&self, direction: LinkDirection) -> ResourceAllocationType {
        match direction {
            LinkDirection::Downlink => self.pdsch_ra_type,
            LinkDirection::Uplink => self.pusch_ra_type,
        }
    }
}

/// PRB allocator of one BWP, link direction and slot
#[derive(Debug, Clone)]
pub struct SchAllocator {
    bwp: Arc<BwpParams>,
    direction: LinkDirection,
    slot_idx: u32,
    used_prbs: PrbBitmap,
    grants: Vec<CommittedGrant>,
}

impl SchAllocator {
    pub fn new(bwp: Arc<BwpParams>, direction: LinkDirection, slot_idx: u32) -> Self {
        let used_prbs = PrbBitmap::new(bwp.nof_prb());
        let grants = Vec::with_capacity(bwp.max_grants_per_slot);
        Self {
            bwp,
            direction,
            slot_idx,
            used_prbs,
            grants,
        }
    }

    /// PDSCH allocator for `slot_idx`
    pub fn pdsch(bwp: Arc<BwpParams>, slot_idx: u32) -> Self {
        Self::new(bwp, LinkDirection::Downlink, slot_idx)
    }

    /// PUSCH allocator for `slot_idx`
    pub fn pusch(bwp: Arc<BwpParams>, slot_idx: u32) -> Self {
        Self::new(bwp, LinkDirection::Uplink, slot_idx)
    }

    pub fn bwp(&self) -> &BwpParams {
        &self.bwp
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn slot_idx(&self) -> u32 {
        self.slot_idx
    }

    /// Grants committed since the last reset, in commit order
    pub fn grants(&self) -> &[CommittedGrant] {
        &self.grants
    }

    /// Clear the grant list and the PRB occupancy
    pub fn reset(&mut self) {
        self.grants.clear();
        self.used_prbs.reset();
        trace!("SCHED: {:?} allocator reset for slot={}", self.direction, self.slot_idx);
    }

    /// Check whether `grant` may be committed without committing it
    pub fn is_grant_valid(
        &self,
        ss_id: u8,
        dci_format: DciFormat,
        grant: &PrbGrant,
        ue: Option<&UeCarrierParams>,
    ) -> Result<(), AllocError> {
        self.check_grant(Some(ss_id), dci_format, grant, ue).map(|_| ())
    }

    pub fn is_si_grant_valid(&self, ss_id: u8, grant: &PrbGrant) -> Result<(), AllocError> {
        self.is_grant_valid(ss_id, DciFormat::Format10, grant, None)
    }

    pub fn is_rar_grant_valid(&self, grant: &PrbGrant) -> Result<(), AllocError> {
        self.check_grant(self.bwp.pdcch.ra_search_space, DciFormat::Format10, grant, None)
            .map(|_| ())
    }

    pub fn is_ue_grant_valid(
        &self,
        ue: &UeCarrierParams,
        ss_id: u8,
        dci_format: DciFormat,
        grant: &PrbGrant,
    ) -> Result<(), AllocError> {
        self.is_grant_valid(ss_id, dci_format, grant, Some(ue))
    }

    fn check_grant(
        &self,
        ss_id: Option<u8>,
        dci_format: DciFormat,
        grant: &PrbGrant,
        ue: Option<&UeCarrierParams>,
    ) -> Result<(ResolvedSearchSpace, PrbBitmap), AllocError> {
        let activity = self.bwp.slot_activity(self.slot_idx);
        let active = match self.direction {
            LinkDirection::Downlink => activity.is_dl,
            LinkDirection::Uplink => activity.is_ul,
        };
        if !active {
            debug!("SCHED: {:?} is disabled for slot={}", self.direction, self.slot_idx);
            return Err(AllocError::InactiveSlot);
        }

        if self.grants.len() >= self.bwp.max_grants_per_slot {
            debug!("SCHED: Maximum number of grants={} reached", self.grants.len());
            return Err(AllocError::NoSchSpace);
        }

        let ss = ss_id
            .and_then(|id| self.bwp.resolve_search_space(id, ue.map(|u| &u.pdcch)))
            .ok_or_else(|| {
                debug!("SCHED: SearchSpace#{:?} is not configured", ss_id);
                AllocError::InvalidSearchSpace
            })?;

        if dci_format.is_downlink() != (self.direction == LinkDirection::Downlink) {
            debug!("SCHED: DCI format {:?} does not match {:?}", dci_format, self.direction);
            return Err(AllocError::InvalidGrantParams);
        }

        // TS 38.214 5.1.2.2 / 6.1.2.2 - the fallback formats only use resource allocation type 1
        if grant.is_type0() && (dci_format.is_compact() || ss.ss_type.is_common()) {
            debug!("SCHED: Resource allocation type 0 used with DCI format {:?} in {:?} SearchSpace", dci_format, ss.ss_type);
            return Err(AllocError::InvalidGrantParams);
        }
        if let Some(ue) = ue {
            if !dci_format.is_compact() && !ue.ra_type(self.direction).allows(grant) {
                debug!("SCHED: Grant {} incompatible with rnti={} resource allocation", grant, ue.rnti);
                return Err(AllocError::InvalidGrantParams);
            }
        }

        let prbs = match grant.to_prb_bitmap(&self.bwp.rbg) {
            Ok(prbs) if !prbs.none() => prbs,
            _ => {
                debug!("SCHED: Grant {} does not fit BWP of {} PRBs", grant, self.bwp.nof_prb());
                return Err(AllocError::InvalidGrantParams);
            }
        };

        // TS 38.214 5.1.2.2.2 - DCI 1_0 in a common search space is limited to the CORESET PRBs
        if let PrbGrant::Type1(interval) = grant {
            let limits = self.bwp.prb_limits(&ss, dci_format);
            if !limits.contains_interval(interval) {
                debug!("SCHED: Provided PRB grant={} collides with CORESET PRB limits={}", interval, limits);
                return Err(AllocError::SchCollision);
            }
        }

        if self.used_prbs.intersects(&prbs) {
            debug!("SCHED: Provided PRB grant={} collides with allocations previously made", grant);
            return Err(AllocError::SchCollision);
        }

        Ok((ss, prbs))
    }

    /// Validate `grant` and commit it
    pub fn alloc(
        &mut self,
        ss_id: u8,
        dci_format: DciFormat,
        rnti: Rnti,
        rnti_type: RntiType,
        grant: PrbGrant,
        ue: Option<&UeCarrierParams>,
    ) -> Result<&mut CommittedGrant, AllocError> {
        let (ss, _) = self.check_grant(Some(ss_id), dci_format, &grant, ue)?;
        let ctx = DciContext::new(&ss, dci_format, rnti, rnti_type);
        Ok(self.alloc_unchecked(ctx, grant))
    }

    /// SIB/SI message PDSCH scheduled with DCI 1_0 and SI-RNTI
    pub fn alloc_si_pdsch(&mut self, ss_id: u8, grant: PrbGrant) -> Result<&mut CommittedGrant, AllocError> {
        self.alloc(ss_id, DciFormat::Format10, Rnti::SI, RntiType::Si, grant, None)
    }

    /// RAR PDSCH scheduled in the ra-SearchSpace
    pub fn alloc_rar_pdsch(&mut self, ra_rnti: Rnti, grant: PrbGrant) -> Result<&mut CommittedGrant, AllocError> {
        let (ss, _) = self.check_grant(self.bwp.pdcch.ra_search_space, DciFormat::Format10, &grant, None)?;
        let ctx = DciContext::new(&ss, DciFormat::Format10, ra_rnti, RntiType::Ra);
        Ok(self.alloc_unchecked(ctx, grant))
    }

    /// Msg3 PUSCH granted by a RAR, addressed to the TC-RNTI
    pub fn alloc_msg3_pusch(&mut self, tc_rnti: Rnti, grant: PrbGrant) -> Result<&mut CommittedGrant, AllocError> {
        let (ss, _) = self.check_grant(self.bwp.pdcch.ra_search_space, DciFormat::Format00, &grant, None)?;
        let ctx = DciContext::new(&ss, DciFormat::Format00, tc_rnti, RntiType::Tc);
        Ok(self.alloc_unchecked(ctx, grant))
    }

    /// C-RNTI PDSCH or PUSCH
    pub fn alloc_ue(
        &mut self,
        ue: &UeCarrierParams,
        ss_id: u8,
        dci_format: DciFormat,
        grant: PrbGrant,
    ) -> Result<&mut CommittedGrant, AllocError> {
        self.alloc(ss_id, dci_format, ue.rnti, RntiType::C, grant, Some(ue))
    }

    /// Commit `grant` without validation
    ///
    /// The caller must have checked the grant with [`Self::is_grant_valid`] in the current
    /// slot state. A grant that overlaps earlier ones is committed as is and breaks the
    /// no-overlap guarantee. Panics if the grant leaves the BWP or the list is full.
    pub fn alloc_unchecked(&mut self, ctx: DciContext, grant: PrbGrant) -> &mut CommittedGrant {
        assert!(
            self.grants.len() < self.bwp.max_grants_per_slot,
            "Grant list of slot={} is full",
            self.slot_idx
        );
        let prbs = grant
            .to_prb_bitmap(&self.bwp.rbg)
            .unwrap_or_else(|e| panic!("Unchecked grant {} is invalid: {}", grant, e));

        let freq_domain_assignment = match &grant {
            PrbGrant::Type0(rbgs) => rbgs.to_field(),
            PrbGrant::Type1(interval) => {
                let (nof_prb, rb_start) = self.bwp.riv_domain(&ctx.search_space(), ctx.format);
                assert!(
                    interval.start() >= rb_start,
                    "Invalid PRB index={} < {}",
                    interval.start(),
                    rb_start
                );
                ra_type1_riv(nof_prb, interval.start() - rb_start, interval.length())
            }
        };

        let time_alloc = match self.direction {
            LinkDirection::Downlink => default_pdsch_time_alloc(DEFAULT_TIME_DOMAIN_ASSIGNMENT),
            LinkDirection::Uplink => default_pusch_time_alloc(DEFAULT_TIME_DOMAIN_ASSIGNMENT),
        }
        .unwrap_or_else(|| unreachable!("default time domain tables are not empty"));

        self.used_prbs |= &prbs;
        self.grants.push(CommittedGrant {
            slot_idx: self.slot_idx,
            direction: self.direction,
            ctx,
            grant,
            prbs,
            dci: DciGrantFields {
                time_domain_assignment: DEFAULT_TIME_DOMAIN_ASSIGNMENT,
                freq_domain_assignment,
            },
            time_alloc,
        });

        let committed = self.grants.len() - 1;
        let committed = &mut self.grants[committed];
        trace!("SCHED: slot={} committed {}", self.slot_idx, committed);
        committed
    }

    /// Roll back the most recent grant
    ///
    /// Panics when there is nothing to cancel.
    pub fn cancel_last(&mut self) {
        let cancelled = self.grants.pop();
        assert!(cancelled.is_some(), "cancel_last called on an empty grant list");

        self.used_prbs.reset();
        for g in &self.grants {
            self.used_prbs |= &g.prbs;
        }
        if let Some(g) = cancelled {
            trace!("SCHED: slot={} cancelled {}", self.slot_idx, g);
        }
    }

    /// Occupied PRBs for a grant from `ss_id` with `dci_format`
    ///
    /// Combines the PRBs already committed in this slot with the PRBs outside the window
    /// allowed for the search space and format.
    pub fn occupied_prbs(&self, ss_id: u8, dci_format: DciFormat) -> PrbBitmap {
        self.occupied_prbs_for(ss_id, dci_format, None)
    }

    /// [`Self::occupied_prbs`] resolving the search space with the UE configuration first
    pub fn occupied_prbs_for(&self, ss_id: u8, dci_format: DciFormat, ue: Option<&UeCarrierParams>) -> PrbBitmap {
        match self.bwp.resolve_search_space(ss_id, ue.map(|u| &u.pdcch)) {
            Some(ss) => self.used_prbs.union(&self.bwp.excluded_prbs(&ss, dci_format)),
            None => self.used_prbs.clone(),
        }
    }
}
