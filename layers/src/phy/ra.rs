//! Resource Allocation
//!
//! MCS interpretation, transport block sizing, RIV coding and the default
//! time-domain allocation table (3GPP TS 38.214 Section 5.1).

use crate::LayerError;
use super::NRE;
use common::Carrier;

/// Highest MCS index of the 64QAM table
pub const MAX_MCS: u32 = 28;

/// REs per PRB after DMRS and overhead are capped to this value
const MAX_RE_PER_PRB: u32 = 156;

/// DMRS REs per PRB: one type A symbol, configuration type 1, two CDM groups without data
const DMRS_RE_PER_PRB: u32 = 12;

/// Modulation order and target code rate (x1024) of MCS table 5.1.3.1-1
const MCS_TABLE_64QAM: [(u32, u32); 29] = [
    (2, 120), (2, 157), (2, 193), (2, 251), (2, 308), (2, 379), (2, 449), (2, 526),
    (2, 602), (2, 679), (4, 340), (4, 378), (4, 434), (4, 490), (4, 553), (4, 616),
    (4, 658), (6, 438), (6, 466), (6, 517), (6, 567), (6, 616), (6, 666), (6, 719),
    (6, 772), (6, 822), (6, 873), (6, 910), (6, 948),
];

/// TBS for N_info <= 3824, table 5.1.3.2-1
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064,
    1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800,
    1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856,
    2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Default time-domain allocation A, normal CP, DMRS type A position 2: (S, L)
const TIME_DEFAULT_A: [(u32, u32); 16] = [
    (2, 12), (2, 10), (2, 9), (2, 7), (2, 5), (9, 4), (4, 4), (5, 7),
    (5, 2), (9, 2), (12, 2), (1, 13), (1, 6), (2, 4), (4, 7), (8, 4),
];

/// Modulation order and code rate of an MCS index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsEntry {
    /// Bits per symbol
    pub qm: u32,
    /// Target code rate x1024
    pub r_x1024: u32,
}

pub fn mcs_entry(mcs: u32) -> Option<McsEntry> {
    MCS_TABLE_64QAM
        .get(mcs as usize)
        .map(|&(qm, r_x1024)| McsEntry { qm, r_x1024 })
}

/// PDSCH time-domain allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAlloc {
    /// Slot offset between DCI and data
    pub k0: u32,
    pub start_symbol: u32,
    pub nof_symbols: u32,
}

/// Row `m` of the default time-domain allocation table A
pub fn time_default_a(m: u32) -> Result<TimeAlloc, LayerError> {
    TIME_DEFAULT_A
        .get(m as usize)
        .map(|&(start_symbol, nof_symbols)| TimeAlloc { k0: 0, start_symbol, nof_symbols })
        .ok_or_else(|| LayerError::InvalidConfiguration(format!("Time domain allocation row {}", m)))
}

/// Row of the default table A holding `alloc`
pub fn time_default_a_index(alloc: &TimeAlloc) -> Option<u32> {
    TIME_DEFAULT_A
        .iter()
        .position(|&(s, l)| alloc.k0 == 0 && s == alloc.start_symbol && l == alloc.nof_symbols)
        .map(|m| m as u32)
}

/// Encode a contiguous allocation as a resource indication value (type 1)
pub fn riv_encode(n_bwp: u32, start: u32, len: u32) -> u32 {
    if len - 1 <= n_bwp / 2 {
        n_bwp * (len - 1) + start
    } else {
        n_bwp * (n_bwp - len + 1) + (n_bwp - 1 - start)
    }
}

/// Decode a resource indication value into (start, length)
pub fn riv_decode(n_bwp: u32, riv: u32) -> Option<(u32, u32)> {
    if n_bwp == 0 || riv >= n_bwp * (n_bwp + 1) / 2 {
        return None;
    }

    let mut len = riv / n_bwp + 1;
    let mut start = riv % n_bwp;
    if start + len > n_bwp {
        len = n_bwp - len + 2;
        start = n_bwp - 1 - start;
    }

    (len >= 1 && start + len <= n_bwp).then_some((start, len))
}

/// Transport block parameters of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbInfo {
    /// Transport block size in bits
    pub tbs: u32,
    /// Data REs of the allocation
    pub nof_re: u32,
    /// Coded bits carried by the allocation
    pub nof_bits: usize,
    pub qm: u32,
    pub r_x1024: u32,
}

/// Transport block size for N_info bits (TS 38.214 Section 5.1.3.2)
pub fn tbs_from_info(n_info: f64, r: f64) -> u32 {
    if n_info <= 0.0 {
        return 0;
    }

    if n_info <= 3824.0 {
        let n = (n_info.log2().floor() as i32 - 6).max(3);
        let step = f64::from(1u32 << n);
        let n_info_q = (step * (n_info / step).floor()).max(24.0);
        return TBS_TABLE
            .iter()
            .copied()
            .find(|&tbs| f64::from(tbs) >= n_info_q)
            .unwrap_or(3824);
    }

    let n = (n_info - 24.0).log2().floor() as i32 - 5;
    let step = f64::from(1u32 << n);
    let n_info_q = (step * ((n_info - 24.0) / step).round()).max(3840.0);

    let c = if r <= 0.25 {
        ((n_info_q + 24.0) / 3816.0).ceil()
    } else if n_info_q > 8424.0 {
        ((n_info_q + 24.0) / 8424.0).ceil()
    } else {
        1.0
    };

    (8.0 * c * ((n_info_q + 24.0) / (8.0 * c)).ceil() - 24.0) as u32
}

/// Size the transport block of a PDSCH allocation
pub fn fill_tb(
    carrier: &Carrier,
    mcs: u32,
    nof_prb: u32,
    time: &TimeAlloc,
    nof_layers: u32,
) -> Result<TbInfo, LayerError> {
    let entry = mcs_entry(mcs)
        .ok_or_else(|| LayerError::InvalidConfiguration(format!("MCS {} above {}", mcs, MAX_MCS)))?;

    if nof_prb == 0 || nof_prb > carrier.nof_prb {
        return Err(LayerError::InvalidConfiguration(format!(
            "{} PRB allocation on a {} PRB carrier", nof_prb, carrier.nof_prb
        )));
    }
    if nof_layers == 0 || nof_layers > carrier.max_mimo_layers {
        return Err(LayerError::InvalidConfiguration(format!("{} layers", nof_layers)));
    }
    if time.nof_symbols < 2 || time.start_symbol + time.nof_symbols > super::NSYMB_PER_SLOT as u32 {
        return Err(LayerError::InvalidConfiguration(format!(
            "Symbols {}+{} outside the slot", time.start_symbol, time.nof_symbols
        )));
    }

    let re_per_prb = (NRE as u32 * time.nof_symbols - DMRS_RE_PER_PRB).min(MAX_RE_PER_PRB);
    let nof_re = re_per_prb * nof_prb;
    let r = f64::from(entry.r_x1024) / 1024.0;
    let n_info = f64::from(nof_re) * r * f64::from(entry.qm) * f64::from(nof_layers);

    Ok(TbInfo {
        tbs: tbs_from_info(n_info, r),
        nof_re,
        nof_bits: (nof_re * entry.qm * nof_layers) as usize,
        qm: entry.qm,
        r_x1024: entry.r_x1024,
    })
}
