//! Physical Layer (PHY) Submodules
//! 
//! Slot-level processing of the 5G NR physical layer: the PDCCH
//! control-channel engine, the shared-channel kernel with its soft
//! buffers, resource allocation helpers and the subframe workers that
//! drive them from the worker pool (3GPP TS 38.211-38.214).

pub mod sequence;
pub mod resource_grid;
pub mod coreset;
pub mod dci;
pub mod pdcch;
pub mod ra;
pub mod sch;
pub mod sf_worker;

// Re-export commonly used types
pub use coreset::{Coreset, SearchSpace, SearchSpaceType, CandidateLocations};
pub use dci::{DciFormat, DciLocation, DciMsg, DlDci, RntiType};
pub use pdcch::{BlindSearchOutcome, ChannelEstimator, DciSearch, DmrsEstimator, IdealChannel, PdcchArgs, PdcchChannelEstimate, PdcchNr, PdcchResult};
pub use resource_grid::ResourceGrid;
pub use sch::{SchGrant, SchNr, SchTb, SoftBufferRef, SoftBufferRx, SoftBufferTx};
pub use sf_worker::{CcConfig, PhyCommon, PhyStats, PhyStatsSnapshot, SfWorker, SfWorkerConfig};

/// Subcarriers per resource block
pub const NRE: usize = 12;

/// OFDM symbols per slot (normal cyclic prefix)
pub const NSYMB_PER_SLOT: usize = 14;

/// Size of the CORESET frequency-domain resource bitmap (6 PRB per bit)
pub const CORESET_FREQ_DOMAIN_RES_SIZE: usize = 45;

/// Maximum CORESET duration in symbols
pub const CORESET_DURATION_MAX: u32 = 3;

/// Number of PDCCH aggregation levels (1, 2, 4, 8, 16 CCE)
pub const NOF_AGGREGATION_LEVELS: usize = 5;

/// Maximum PDCCH candidates per aggregation level
pub const MAX_NOF_CANDIDATES: usize = 8;

/// Resource element groups per CCE
pub const REG_PER_CCE: usize = 6;

/// Data resource elements per REG (3 of 12 carry DMRS)
pub const PDCCH_DATA_RE_PER_REG: usize = 9;

/// Data resource elements per CCE
pub const PDCCH_DATA_RE_PER_CCE: usize = REG_PER_CCE * PDCCH_DATA_RE_PER_REG;

/// Data resource elements of the largest PDCCH candidate
pub const PDCCH_MAX_RE: usize = PDCCH_DATA_RE_PER_CCE << (NOF_AGGREGATION_LEVELS - 1);

/// Maximum DCI payload in bits
pub const DCI_MAX_BITS: usize = 128;

/// DCI CRC length in bits
pub const DCI_CRC_LEN: usize = 24;

/// Number of CCEs for an aggregation level index
pub fn aggregation_level_cces(level: u32) -> u32 {
    1 << level
}
