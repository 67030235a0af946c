//! Medium Access Control (MAC) Layer Implementation
//!
//! PRB allocation for PDSCH and PUSCH in NR (3GPP TS 38.214 5.1.2 / 6.1.2): the SLIV/RIV
//! codec, PRB bitmaps and grant shapes, CORESET and search space PRB limits, the per-slot
//! allocator and a slot driver that exercises it.

pub mod pdcch_config;
pub mod prb;
pub mod sch_allocator;
pub mod scheduler;
pub mod sliv;
pub mod time_alloc;

pub use pdcch_config::{
    BwpConfig, BwpParams, Coreset0Config, CoresetConfig, DciFormat, PdcchConfig, ResourceAllocationType,
    SearchSpaceConfig, SearchSpaceType,
};
pub use prb::{PrbBitmap, PrbGrant, PrbInterval, RbgBitmap, RbgConfig, RbgSizeConfig};
pub use sch_allocator::{AllocError, CommittedGrant, LinkDirection, RntiType, SchAllocator, UeCarrierParams};
pub use scheduler::{MacScheduler, RarRequest, Sib1SchedConfig, SlotSchedule, UeSchedConfig};
