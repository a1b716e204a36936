//! CORESET and Search Space
//! 
//! Control resource set geometry and PDCCH candidate hashing per
//! 3GPP TS 38.213 Section 10.1. Only non-interleaved CCE-to-REG mapping
//! is supported: REGs are numbered time first within the CORESET, and
//! CCE `j` holds REGs `6j..6j+5`.

use crate::LayerError;
use super::{
    aggregation_level_cces, CORESET_DURATION_MAX, CORESET_FREQ_DOMAIN_RES_SIZE,
    MAX_NOF_CANDIDATES, NOF_AGGREGATION_LEVELS, REG_PER_CCE,
};
use common::Carrier;
use std::ops::Deref;

/// Control resource set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coreset {
    /// CORESET identifier (0..=11)
    pub id: u32,
    /// Frequency-domain resources, each covering 6 PRB
    pub freq_resources: [bool; CORESET_FREQ_DOMAIN_RES_SIZE],
    /// Duration in symbols (1..=3)
    pub duration: u32,
}

impl Coreset {
    /// Build a CORESET whose first `nof_freq_res` frequency resources are enabled
    pub fn contiguous(id: u32, nof_freq_res: usize, duration: u32) -> Self {
        let mut freq_resources = [false; CORESET_FREQ_DOMAIN_RES_SIZE];
        for res in freq_resources.iter_mut().take(nof_freq_res) {
            *res = true;
        }
        Self { id, freq_resources, duration }
    }

    /// Build a CORESET from a frequency resource bitmap, bit `i` enabling resource `i`
    pub fn from_bitmap(id: u32, bitmap: u64, duration: u32) -> Self {
        let mut freq_resources = [false; CORESET_FREQ_DOMAIN_RES_SIZE];
        for (i, res) in freq_resources.iter_mut().enumerate() {
            *res = (bitmap >> i) & 1 == 1;
        }
        Self { id, freq_resources, duration }
    }

    /// Number of enabled frequency resources
    pub fn nof_freq_res(&self) -> u32 {
        self.freq_resources.iter().filter(|&&r| r).count() as u32
    }

    /// Bandwidth in PRB
    pub fn bw(&self) -> u32 {
        self.nof_freq_res() * 6
    }

    /// Number of CCEs in the CORESET
    pub fn nof_cce(&self) -> u32 {
        self.bw() * self.duration / REG_PER_CCE as u32
    }

    /// Check the CORESET fits the carrier
    pub fn validate(&self, carrier: &Carrier) -> Result<(), LayerError> {
        if self.duration == 0 || self.duration > CORESET_DURATION_MAX {
            return Err(LayerError::InvalidConfiguration(
                format!("CORESET duration {} out of range 1..={}", self.duration, CORESET_DURATION_MAX)
            ));
        }

        let highest = self.freq_resources.iter().rposition(|&r| r).ok_or_else(|| {
            LayerError::InvalidConfiguration("CORESET without frequency resources".to_string())
        })?;

        let end_prb = (highest as u32 + 1) * 6;
        if end_prb > carrier.nof_prb {
            return Err(LayerError::InvalidConfiguration(format!(
                "CORESET spans {} PRB but carrier has {}", end_prb, carrier.nof_prb
            )));
        }

        Ok(())
    }

    /// Absolute PRB indices of the CORESET in increasing order
    pub fn prb_indices(&self) -> Vec<u32> {
        self.freq_resources
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r)
            .flat_map(|(i, _)| (i as u32 * 6)..(i as u32 * 6 + 6))
            .collect()
    }

    /// Range of positions in [`Coreset::prb_indices`] occupied by a candidate
    ///
    /// Each PRB spans all `duration` symbols of the candidate.
    pub fn candidate_prb_range(&self, ncce: u32, level: u32) -> std::ops::Range<usize> {
        let regs_per_cce = REG_PER_CCE as u32;
        let start = ncce * regs_per_cce / self.duration;
        let end = (ncce + aggregation_level_cces(level)) * regs_per_cce / self.duration;
        start as usize..end as usize
    }
}

/// Search space type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSpaceType {
    /// Common search space, hashing offset is zero
    Common,
    /// UE-specific search space
    Ue,
}

/// Search space: candidates per aggregation level within one CORESET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    pub id: u32,
    pub coreset_id: u32,
    pub ss_type: SearchSpaceType,
    /// Candidates configured for each aggregation level
    pub nof_candidates: [u32; NOF_AGGREGATION_LEVELS],
}

impl SearchSpace {
    /// Search space with the maximum number of candidates the CORESET allows
    pub fn with_max_candidates(id: u32, coreset: &Coreset, ss_type: SearchSpaceType) -> Self {
        let mut nof_candidates = [0; NOF_AGGREGATION_LEVELS];
        for (level, n) in nof_candidates.iter_mut().enumerate() {
            *n = max_candidates_coreset(coreset, level as u32);
        }
        Self { id, coreset_id: coreset.id, ss_type, nof_candidates }
    }
}

/// Maximum candidates a CORESET can hold at an aggregation level
///
/// `min(N_CCE / 2^level, 8)`
pub fn max_candidates_coreset(coreset: &Coreset, level: u32) -> u32 {
    if level as usize >= NOF_AGGREGATION_LEVELS {
        return 0;
    }
    let nof_cce = coreset.nof_cce();
    (nof_cce / aggregation_level_cces(level)).min(MAX_NOF_CANDIDATES as u32)
}

/// First CCE of each candidate of one aggregation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateLocations {
    ncce: [u32; MAX_NOF_CANDIDATES],
    len: usize,
}

impl Deref for CandidateLocations {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.ncce[..self.len]
    }
}

/// Hashing offset Y_p,n for a slot (TS 38.213 Section 10.1)
fn hash_offset(coreset_id: u32, rnti: u16, slot: u32) -> u32 {
    const A: [u32; 3] = [39827, 39829, 39839];
    const D: u32 = 65537;

    let a_p = A[(coreset_id % 3) as usize];
    let mut y = rnti as u32;
    for _ in 0..=slot {
        y = ((a_p as u64 * y as u64) % D as u64) as u32;
    }
    y
}

/// Compute the candidate locations of a search space for one aggregation level
///
/// `ncce = L * ((Y + floor(m * N_CCE / (L * M))) mod floor(N_CCE / L))`
/// with `Y = 0` for common search spaces.
pub fn locations_coreset(
    coreset: &Coreset,
    search_space: &SearchSpace,
    rnti: u16,
    level: u32,
    slot: u32,
) -> Result<CandidateLocations, LayerError> {
    if level as usize >= NOF_AGGREGATION_LEVELS {
        return Err(LayerError::InvalidConfiguration(format!("Aggregation level index {}", level)));
    }

    let mut locations = CandidateLocations { ncce: [0; MAX_NOF_CANDIDATES], len: 0 };
    let l = aggregation_level_cces(level);
    let nof_cce = coreset.nof_cce();
    if l > nof_cce {
        // The level does not exist in this CORESET unless candidates were configured for it
        if search_space.nof_candidates[level as usize] == 0 {
            return Ok(locations);
        }
        return Err(LayerError::InvalidConfiguration(format!(
            "Aggregation level {} exceeds CORESET of {} CCE", l, nof_cce
        )));
    }

    let nof_candidates = search_space.nof_candidates[level as usize]
        .min(max_candidates_coreset(coreset, level));

    let y = match search_space.ss_type {
        SearchSpaceType::Common => 0,
        SearchSpaceType::Ue => hash_offset(coreset.id, rnti, slot),
    };

    for m in 0..nof_candidates {
        let offset = (m * nof_cce) / (l * nof_candidates);
        locations.ncce[m as usize] = l * ((y + offset) % (nof_cce / l));
    }
    locations.len = nof_candidates as usize;

    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coreset_geometry() {
        let coreset = Coreset::contiguous(0, 6, 1);
        assert_eq!(coreset.bw(), 36);
        assert_eq!(coreset.nof_cce(), 6);

        let coreset = Coreset::from_bitmap(1, 0b1011, 2);
        assert_eq!(coreset.nof_freq_res(), 3);
        assert_eq!(coreset.nof_cce(), 6);
        let prbs = coreset.prb_indices();
        assert_eq!(prbs.len(), 18);
        assert_eq!(prbs[6], 6);
        assert_eq!(prbs[12], 18);
    }

    #[test]
    fn test_coreset_validation() {
        let carrier = Carrier::default();
        assert!(Coreset::contiguous(0, 8, 1).validate(&carrier).is_ok());
        // 9 resources need 54 PRB
        assert!(Coreset::contiguous(0, 9, 1).validate(&carrier).is_err());
        assert!(Coreset::contiguous(0, 2, 0).validate(&carrier).is_err());
        assert!(Coreset::contiguous(0, 2, 4).validate(&carrier).is_err());
        assert!(Coreset::contiguous(0, 0, 1).validate(&carrier).is_err());
    }

    #[test]
    fn test_max_candidates() {
        let coreset = Coreset::contiguous(0, 6, 1);
        assert_eq!(max_candidates_coreset(&coreset, 0), 6);
        assert_eq!(max_candidates_coreset(&coreset, 1), 3);
        assert_eq!(max_candidates_coreset(&coreset, 2), 1);
        assert_eq!(max_candidates_coreset(&coreset, 3), 0);

        let large = Coreset::contiguous(0, 8, 3);
        assert_eq!(large.nof_cce(), 24);
        assert_eq!(max_candidates_coreset(&large, 0), 8);
        assert_eq!(max_candidates_coreset(&large, 4), 1);
    }

    #[test]
    fn test_candidates_are_aligned_and_inside() {
        let coreset = Coreset::contiguous(2, 8, 3);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);
        for slot in 0..20 {
            for level in 0..NOF_AGGREGATION_LEVELS as u32 {
                let l = aggregation_level_cces(level);
                let locations = locations_coreset(&coreset, &ss, 0x1234, level, slot).unwrap();
                assert_eq!(locations.len() as u32, ss.nof_candidates[level as usize]);
                for &ncce in locations.iter() {
                    assert_eq!(ncce % l, 0);
                    assert!(ncce + l <= coreset.nof_cce());
                }
            }
        }
    }

    #[test]
    fn test_candidates_distinct_when_they_fit() {
        let coreset = Coreset::contiguous(0, 6, 1);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);
        let locations = locations_coreset(&coreset, &ss, 0x1234, 0, 3).unwrap();
        let mut sorted = locations.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 6);
    }

    #[test]
    fn test_common_search_space_ignores_rnti() {
        let coreset = Coreset::contiguous(0, 8, 1);
        let ss = SearchSpace::with_max_candidates(0, &coreset, SearchSpaceType::Common);
        let a = locations_coreset(&coreset, &ss, 0x1234, 1, 5).unwrap();
        let b = locations_coreset(&coreset, &ss, 0x4601, 1, 9).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0);
    }

    #[test]
    fn test_hash_depends_on_slot() {
        let y: Vec<u32> = (0..4).map(|slot| hash_offset(0, 0x1234, slot)).collect();
        assert_eq!(y[0], (39827u64 * 0x1234 % 65537) as u32);
        assert_ne!(y[0], y[1]);
    }

    #[test]
    fn test_level_larger_than_coreset_rejected() {
        let coreset = Coreset::contiguous(0, 1, 1);
        let mut ss = SearchSpace::with_max_candidates(0, &coreset, SearchSpaceType::Ue);
        ss.nof_candidates[3] = 1;
        assert!(locations_coreset(&coreset, &ss, 1, 3, 0).is_err());
        assert!(locations_coreset(&coreset, &ss, 1, 5, 0).is_err());
    }

    #[test]
    fn test_level_larger_than_coreset_without_candidates_is_empty() {
        let coreset = Coreset::contiguous(0, 1, 1);
        assert_eq!(coreset.nof_cce(), 1);
        let ss = SearchSpace::with_max_candidates(0, &coreset, SearchSpaceType::Ue);
        assert_eq!(ss.nof_candidates[1], 0);

        for level in 1..NOF_AGGREGATION_LEVELS as u32 {
            let locations = locations_coreset(&coreset, &ss, 0x1234, level, 0).unwrap();
            assert!(locations.is_empty());
        }
        assert_eq!(locations_coreset(&coreset, &ss, 0x1234, 0, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_candidate_prb_range() {
        let coreset = Coreset::contiguous(0, 4, 2);
        // 24 PRB x 2 symbols = 8 CCE, each CCE covers 3 PRB
        assert_eq!(coreset.candidate_prb_range(0, 0), 0..3);
        assert_eq!(coreset.candidate_prb_range(2, 1), 6..12);
    }
}
