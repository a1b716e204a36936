/// PDCCH (Physical Downlink Control Channel) implementation
/// Based on 3GPP TS 38.211, 38.212, and 38.213
///
/// One DCI is carried on one candidate of a CORESET: CRC24C attachment with
/// the last 16 CRC bits masked by the RNTI, circular repetition of the
/// codeword up to the candidate size under a length-dependent mask, Gold
/// scrambling seeded by RNTI and cell ID, and QPSK on the data REs.

use crate::LayerError;
use super::coreset::{locations_coreset, Coreset, SearchSpace};
use super::dci::{DciFormat, DciLocation, DciMsg, RntiType};
use super::resource_grid::ResourceGrid;
use super::sequence::{pdcch_data_cinit, pdcch_dmrs_cinit, GoldSequence};
use super::{
    aggregation_level_cces, DCI_CRC_LEN, DCI_MAX_BITS, NOF_AGGREGATION_LEVELS, NRE,
    PDCCH_DATA_RE_PER_CCE, PDCCH_MAX_RE,
};
use common::{crc24c_bits, read_bits, write_bits, Carrier};
use num_complex::Complex32;
use std::f32::consts::FRAC_1_SQRT_2;
use std::ops::{Range, RangeInclusive};
use std::time::Instant;
use tracing::{debug, trace};

/// Mean equalised energy below which a candidate is treated as empty
const MIN_CANDIDATE_ENERGY: f32 = 0.1;

/// DMRS occupies subcarriers 1, 5 and 9 of each REG
fn is_dmrs_subcarrier(k: usize) -> bool {
    k % 4 == 1
}

/// Visit the data REs of a candidate as (subcarrier, symbol), symbol first
fn for_each_data_re(prbs: &[u32], duration: u32, mut f: impl FnMut(usize, usize)) {
    for l in 0..duration as usize {
        for &prb in prbs {
            for k in (0..NRE).filter(|&k| !is_dmrs_subcarrier(k)) {
                f(prb as usize * NRE + k, l);
            }
        }
    }
}

/// CRC over 24 ones followed by the payload
fn dci_crc(scratch: &mut [u8; DCI_CRC_LEN + DCI_MAX_BITS], payload: &[u8]) -> u32 {
    scratch[..DCI_CRC_LEN].fill(1);
    scratch[DCI_CRC_LEN..DCI_CRC_LEN + payload.len()].copy_from_slice(payload);
    crc24c_bits(&scratch[..DCI_CRC_LEN + payload.len()])
}

/// Rate-matching mask seed, tied to the number of coded bits
fn rate_match_cinit(nof_coded_bits: usize) -> u32 {
    nof_coded_bits as u32
}

/// The grid must span exactly the configured carrier
fn check_grid(carrier: &Carrier, grid: &ResourceGrid) -> Result<(), LayerError> {
    if grid.nof_prb() != carrier.nof_prb {
        return Err(LayerError::InvalidState(format!(
            "Grid of {} PRB for carrier of {} PRB", grid.nof_prb(), carrier.nof_prb
        )));
    }
    Ok(())
}

/// PDCCH processing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcchArgs {
    pub measure_evm: bool,
    pub measure_time: bool,
}

/// Channel estimate over the data REs of one candidate
#[derive(Debug, Clone, Default)]
pub struct PdcchChannelEstimate {
    /// Channel coefficient per data RE, in mapping order
    pub ce: Vec<Complex32>,
    /// Number of valid entries in `ce`
    pub nof_re: usize,
    pub noise_var: f32,
}

impl PdcchChannelEstimate {
    /// Allocate room for the largest candidate
    pub fn new() -> Self {
        Self {
            ce: vec![Complex32::new(0.0, 0.0); PDCCH_MAX_RE],
            nof_re: 0,
            noise_var: 0.0,
        }
    }

    /// Unit gain, noiseless estimate covering `nof_re` REs
    pub fn ideal(nof_re: usize) -> Self {
        let mut ce = Self::new();
        ce.nof_re = nof_re.min(PDCCH_MAX_RE);
        ce.ce[..ce.nof_re].fill(Complex32::new(1.0, 0.0));
        ce
    }
}

/// Produces the channel estimate for one candidate
pub trait ChannelEstimator {
    /// `prbs` are the candidate's PRBs in increasing order, each spanning `duration` symbols
    fn estimate(
        &self,
        grid: &ResourceGrid,
        prbs: &[u32],
        duration: u32,
        ce: &mut PdcchChannelEstimate,
    ) -> Result<(), LayerError>;
}

/// Ideal channel: unit gain and no noise
#[derive(Debug, Clone, Copy, Default)]
pub struct IdealChannel;

impl ChannelEstimator for IdealChannel {
    fn estimate(
        &self,
        _grid: &ResourceGrid,
        prbs: &[u32],
        duration: u32,
        ce: &mut PdcchChannelEstimate,
    ) -> Result<(), LayerError> {
        let nof_re = prbs.len() * duration as usize * (NRE - 3);
        if ce.ce.len() < nof_re {
            ce.ce.resize(nof_re, Complex32::new(0.0, 0.0));
        }
        ce.ce[..nof_re].fill(Complex32::new(1.0, 0.0));
        ce.nof_re = nof_re;
        ce.noise_var = 0.0;
        Ok(())
    }
}

/// Least-squares estimator on the PDCCH DMRS, one coefficient per PRB and symbol
#[derive(Debug, Clone, Copy)]
pub struct DmrsEstimator {
    pub slot: u32,
    pub n_id: u16,
    /// Carrier offset from common resource block 0
    pub carrier_start: u32,
}

impl ChannelEstimator for DmrsEstimator {
    fn estimate(
        &self,
        grid: &ResourceGrid,
        prbs: &[u32],
        duration: u32,
        ce: &mut PdcchChannelEstimate,
    ) -> Result<(), LayerError> {
        let nof_re = prbs.len() * duration as usize * (NRE - 3);
        if ce.ce.len() < nof_re {
            ce.ce.resize(nof_re, Complex32::new(0.0, 0.0));
        }

        let mut i = 0;
        let mut noise = 0.0f32;
        let mut nof_pilots = 0usize;
        for l in 0..duration {
            let mut seq = GoldSequence::new(pdcch_dmrs_cinit(self.slot, l, self.n_id));
            let mut pos = 0u32;
            for &prb in prbs {
                let crb = self.carrier_start + prb;
                seq.skip(((crb - pos) * 3) as usize);
                pos = crb + 1;

                let mut pilots = [(Complex32::new(0.0, 0.0), Complex32::new(0.0, 0.0)); 3];
                let mut h = Complex32::new(0.0, 0.0);
                for (n, k) in (0..NRE).filter(|&k| is_dmrs_subcarrier(k)).enumerate() {
                    let reference = seq.next_qpsk_symbol(FRAC_1_SQRT_2);
                    let received = grid
                        .get(prb as usize * NRE + k, l as usize)
                        .ok_or_else(|| LayerError::InvalidState(format!("PRB {} outside grid", prb)))?;
                    pilots[n] = (received, reference);
                    h += received * reference.conj();
                }
                h /= pilots.len() as f32;

                for (received, reference) in pilots {
                    noise += (received - h * reference).norm_sqr();
                }
                nof_pilots += pilots.len();

                ce.ce[i..i + NRE - 3].fill(h);
                i += NRE - 3;
            }
        }

        ce.nof_re = nof_re;
        // Three pilots per estimate leave two degrees of freedom
        ce.noise_var = if nof_pilots > 0 { noise / nof_pilots as f32 * 1.5 } else { 0.0 };
        Ok(())
    }
}

/// Outcome of decoding one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdcchResult {
    /// CRC matched for the message RNTI
    pub crc: bool,
    /// Error vector magnitude, when measured and the candidate carried energy
    pub evm: Option<f32>,
}

/// What to look for in a blind search
#[derive(Debug, Clone)]
pub struct DciSearch {
    pub rnti: u16,
    pub rnti_type: RntiType,
    pub format: DciFormat,
    /// Expected payload size
    pub nof_bits: usize,
    /// Slot index within the frame
    pub slot: u32,
    /// Aggregation level indices to try, in increasing order
    pub levels: RangeInclusive<u32>,
}

/// Result of a blind search
#[derive(Debug, Clone, PartialEq)]
pub enum BlindSearchOutcome {
    /// First candidate whose CRC matched
    Found { msg: DciMsg, candidate: u32 },
    NoMatch,
}

/// PDCCH encoder/decoder bound to one carrier and CORESET
pub struct PdcchNr {
    args: PdcchArgs,
    carrier: Option<Carrier>,
    coreset: Option<Coreset>,
    coreset_prbs: Vec<u32>,
    symbols: Vec<Complex32>,
    llr: Vec<f32>,
    codeword: [u8; DCI_MAX_BITS + DCI_CRC_LEN],
    soft: [f32; DCI_MAX_BITS + DCI_CRC_LEN],
    crc_scratch: [u8; DCI_CRC_LEN + DCI_MAX_BITS],
    ce: PdcchChannelEstimate,
    meas_time_us: u64,
}

impl PdcchNr {
    pub fn new(args: PdcchArgs) -> Self {
        Self {
            args,
            carrier: None,
            coreset: None,
            coreset_prbs: Vec::new(),
            symbols: vec![Complex32::new(0.0, 0.0); PDCCH_MAX_RE],
            llr: vec![0.0; 2 * PDCCH_MAX_RE],
            codeword: [0; DCI_MAX_BITS + DCI_CRC_LEN],
            soft: [0.0; DCI_MAX_BITS + DCI_CRC_LEN],
            crc_scratch: [0; DCI_CRC_LEN + DCI_MAX_BITS],
            ce: PdcchChannelEstimate::new(),
            meas_time_us: 0,
        }
    }

    /// Bind to a carrier and CORESET
    pub fn set_carrier(&mut self, carrier: &Carrier, coreset: &Coreset) -> Result<(), LayerError> {
        carrier.validate()?;
        coreset.validate(carrier)?;

        self.coreset_prbs = coreset.prb_indices();
        self.carrier = Some(*carrier);
        self.coreset = Some(coreset.clone());

        debug!(
            "PDCCH configured: PCI {}, CORESET {} with {} CCE over {} symbols",
            carrier.pci,
            coreset.id,
            coreset.nof_cce(),
            coreset.duration
        );
        Ok(())
    }

    pub fn coreset(&self) -> Option<&Coreset> {
        self.coreset.as_ref()
    }

    /// Duration of the last encode/decode in microseconds, when time measurement is enabled
    pub fn meas_time_us(&self) -> u64 {
        self.meas_time_us
    }

    /// Validate a message against the configuration
    ///
    /// Returns the scrambling ID, the CORESET duration and the candidate's
    /// range in the CORESET PRB table.
    fn candidate(&self, msg: &DciMsg, grid: &ResourceGrid) -> Result<(u16, u32, Range<usize>), LayerError> {
        let (carrier, coreset) = match (&self.carrier, &self.coreset) {
            (Some(carrier), Some(coreset)) => (carrier, coreset),
            _ => return Err(LayerError::NotInitialized),
        };

        check_grid(carrier, grid)?;

        if msg.nof_bits == 0 || msg.nof_bits > DCI_MAX_BITS {
            return Err(LayerError::InvalidConfiguration(format!("DCI size {} bits", msg.nof_bits)));
        }

        let location = &msg.location;
        if location.level as usize >= NOF_AGGREGATION_LEVELS {
            return Err(LayerError::InvalidConfiguration(format!("Aggregation level index {}", location.level)));
        }

        let l = aggregation_level_cces(location.level);
        if location.ncce % l != 0 || location.ncce + l > coreset.nof_cce() {
            return Err(LayerError::InvalidConfiguration(format!(
                "Candidate at CCE {} with L={} outside CORESET of {} CCE",
                location.ncce, l, coreset.nof_cce()
            )));
        }

        let nof_coded_bits = 2 * PDCCH_DATA_RE_PER_CCE * l as usize;
        if msg.nof_bits + DCI_CRC_LEN > nof_coded_bits {
            return Err(LayerError::InvalidConfiguration(format!(
                "DCI of {} bits does not fit {} coded bits", msg.nof_bits, nof_coded_bits
            )));
        }

        Ok((carrier.pci, coreset.duration, coreset.candidate_prb_range(location.ncce, location.level)))
    }

    /// Encode a DCI into its candidate's data REs
    pub fn encode(&mut self, msg: &DciMsg, grid: &mut ResourceGrid) -> Result<(), LayerError> {
        let start = self.args.measure_time.then(Instant::now);
        let (n_id, duration, prb_range) = self.candidate(msg, grid)?;

        let k = msg.nof_bits + DCI_CRC_LEN;
        let crc = dci_crc(&mut self.crc_scratch, msg.bits()) ^ msg.rnti as u32;
        self.codeword[..msg.nof_bits].copy_from_slice(msg.bits());
        write_bits(&mut self.codeword[msg.nof_bits..k], crc, DCI_CRC_LEN);

        let nof_re = PDCCH_DATA_RE_PER_CCE * aggregation_level_cces(msg.location.level) as usize;
        let e = 2 * nof_re;
        let mut mask = GoldSequence::new(rate_match_cinit(e));
        let mut scrambler = GoldSequence::new(pdcch_data_cinit(msg.rnti, n_id));

        for (i, symbol) in self.symbols[..nof_re].iter_mut().enumerate() {
            let b0 = self.codeword[(2 * i) % k] ^ mask.next_bit() ^ scrambler.next_bit();
            let b1 = self.codeword[(2 * i + 1) % k] ^ mask.next_bit() ^ scrambler.next_bit();
            *symbol = Complex32::new(
                FRAC_1_SQRT_2 * (1.0 - 2.0 * b0 as f32),
                FRAC_1_SQRT_2 * (1.0 - 2.0 * b1 as f32),
            );
        }

        let mut i = 0;
        let symbols = &self.symbols;
        for_each_data_re(&self.coreset_prbs[prb_range], duration, |sc, l| {
            grid.set(sc, l, symbols[i]);
            i += 1;
        });

        trace!(
            "Encoded DCI for RNTI 0x{:04x}: {} bits at CCE {} L={}",
            msg.rnti, msg.nof_bits, msg.location.ncce, aggregation_level_cces(msg.location.level)
        );

        if let Some(start) = start {
            self.meas_time_us = start.elapsed().as_micros() as u64;
        }
        Ok(())
    }

    /// Write the PDCCH DMRS of a candidate
    pub fn put_dmrs(&self, slot: u32, location: &DciLocation, grid: &mut ResourceGrid) -> Result<(), LayerError> {
        let (carrier, coreset) = match (&self.carrier, &self.coreset) {
            (Some(carrier), Some(coreset)) => (carrier, coreset),
            _ => return Err(LayerError::NotInitialized),
        };
        check_grid(carrier, grid)?;

        let l_cce = aggregation_level_cces(location.level);
        if !location.is_valid() || location.ncce + l_cce > coreset.nof_cce() {
            return Err(LayerError::InvalidConfiguration(format!("DMRS for CCE {} L={}", location.ncce, l_cce)));
        }

        let prbs = &self.coreset_prbs[coreset.candidate_prb_range(location.ncce, location.level)];
        for l in 0..coreset.duration {
            let mut seq = GoldSequence::new(pdcch_dmrs_cinit(slot, l, carrier.pci));
            let mut pos = 0u32;
            for &prb in prbs {
                let crb = carrier.start + prb;
                seq.skip(((crb - pos) * 3) as usize);
                pos = crb + 1;

                for k in (0..NRE).filter(|&k| is_dmrs_subcarrier(k)) {
                    grid.set(prb as usize * NRE + k, l as usize, seq.next_qpsk_symbol(FRAC_1_SQRT_2));
                }
            }
        }

        Ok(())
    }

    /// Decode the candidate given by `msg.location` for `msg.rnti`
    ///
    /// The payload bits are written into `msg` whatever the CRC outcome.
    pub fn decode(
        &mut self,
        grid: &ResourceGrid,
        ce: &PdcchChannelEstimate,
        msg: &mut DciMsg,
    ) -> Result<PdcchResult, LayerError> {
        let start = self.args.measure_time.then(Instant::now);
        let (n_id, duration, prb_range) = self.candidate(msg, grid)?;

        let nof_re = PDCCH_DATA_RE_PER_CCE * aggregation_level_cces(msg.location.level) as usize;
        if ce.nof_re < nof_re || ce.ce.len() < nof_re {
            return Err(LayerError::InvalidConfiguration(format!(
                "Channel estimate covers {} of {} REs", ce.nof_re, nof_re
            )));
        }

        // Extract and equalise
        let mut i = 0;
        let symbols = &mut self.symbols;
        for_each_data_re(&self.coreset_prbs[prb_range], duration, |sc, l| {
            let y = grid.get(sc, l).unwrap_or_default();
            let h = ce.ce[i];
            let den = h.norm_sqr() + ce.noise_var;
            symbols[i] = if den > 0.0 { y * h.conj() / den } else { Complex32::new(0.0, 0.0) };
            i += 1;
        });

        let energy = self.symbols[..nof_re].iter().map(|x| x.norm_sqr()).sum::<f32>() / nof_re as f32;
        if energy < MIN_CANDIDATE_ENERGY {
            trace!("Candidate at CCE {} carries no energy ({:.3})", msg.location.ncce, energy);
            return Ok(PdcchResult { crc: false, evm: None });
        }

        for (i, x) in self.symbols[..nof_re].iter().enumerate() {
            self.llr[2 * i] = x.re;
            self.llr[2 * i + 1] = x.im;
        }

        // Descramble and combine repetitions
        let k = msg.nof_bits + DCI_CRC_LEN;
        let e = 2 * nof_re;
        let mut mask = GoldSequence::new(rate_match_cinit(e));
        let mut scrambler = GoldSequence::new(pdcch_data_cinit(msg.rnti, n_id));
        self.soft[..k].fill(0.0);
        for j in 0..e {
            let llr = if mask.next_bit() ^ scrambler.next_bit() == 1 { -self.llr[j] } else { self.llr[j] };
            self.soft[j % k] += llr;
        }

        for (bit, &soft) in self.codeword[..k].iter_mut().zip(&self.soft[..k]) {
            *bit = (soft < 0.0) as u8;
        }

        msg.payload[..msg.nof_bits].copy_from_slice(&self.codeword[..msg.nof_bits]);
        let crc_rx = read_bits(&self.codeword[msg.nof_bits..k], DCI_CRC_LEN) ^ msg.rnti as u32;
        let crc = crc_rx == dci_crc(&mut self.crc_scratch, msg.bits());

        let evm = self.args.measure_evm.then(|| {
            let mut mask = GoldSequence::new(rate_match_cinit(e));
            let mut scrambler = GoldSequence::new(pdcch_data_cinit(msg.rnti, n_id));
            let mut error = 0.0f32;
            for (i, x) in self.symbols[..nof_re].iter().enumerate() {
                let b0 = self.codeword[(2 * i) % k] ^ mask.next_bit() ^ scrambler.next_bit();
                let b1 = self.codeword[(2 * i + 1) % k] ^ mask.next_bit() ^ scrambler.next_bit();
                let reference = Complex32::new(
                    FRAC_1_SQRT_2 * (1.0 - 2.0 * b0 as f32),
                    FRAC_1_SQRT_2 * (1.0 - 2.0 * b1 as f32),
                );
                error += (x - reference).norm_sqr();
            }
            (error / nof_re as f32).sqrt()
        });

        if let Some(start) = start {
            self.meas_time_us = start.elapsed().as_micros() as u64;
        }
        Ok(PdcchResult { crc, evm })
    }

    /// Try every candidate of a search space until one decodes for the RNTI
    ///
    /// Levels are tried in increasing order and candidates in index order;
    /// the first CRC match wins.
    pub fn blind_search(
        &mut self,
        grid: &ResourceGrid,
        estimator: &dyn ChannelEstimator,
        search_space: &SearchSpace,
        search: &DciSearch,
    ) -> Result<BlindSearchOutcome, LayerError> {
        let coreset = self.coreset.clone().ok_or(LayerError::NotInitialized)?;
        if search_space.coreset_id != coreset.id {
            return Err(LayerError::InvalidConfiguration(format!(
                "Search space {} uses CORESET {} but engine holds CORESET {}",
                search_space.id, search_space.coreset_id, coreset.id
            )));
        }

        let mut ce = std::mem::take(&mut self.ce);
        let outcome = self.search_candidates(grid, estimator, &coreset, search_space, search, &mut ce);
        self.ce = ce;
        outcome
    }

    fn search_candidates(
        &mut self,
        grid: &ResourceGrid,
        estimator: &dyn ChannelEstimator,
        coreset: &Coreset,
        search_space: &SearchSpace,
        search: &DciSearch,
        ce: &mut PdcchChannelEstimate,
    ) -> Result<BlindSearchOutcome, LayerError> {
        for level in search.levels.clone() {
            if level as usize >= NOF_AGGREGATION_LEVELS || search_space.nof_candidates[level as usize] == 0 {
                continue;
            }

            let locations = locations_coreset(coreset, search_space, search.rnti, level, search.slot)?;
            for (candidate, &ncce) in locations.iter().enumerate() {
                let location = DciLocation { level, ncce };
                let range = coreset.candidate_prb_range(ncce, level);
                estimator.estimate(grid, &self.coreset_prbs[range], coreset.duration, ce)?;

                let mut msg = DciMsg::new(search.format, search.rnti_type, search.rnti, location, search.nof_bits);
                let result = self.decode(grid, ce, &mut msg)?;
                trace!(
                    "RNTI 0x{:04x} candidate {} at CCE {} L={}: crc={}",
                    search.rnti, candidate, ncce, aggregation_level_cces(level), result.crc
                );

                if result.crc {
                    debug!(
                        "Found DCI for RNTI 0x{:04x} at CCE {} L={} (candidate {})",
                        search.rnti, ncce, aggregation_level_cces(level), candidate
                    );
                    return Ok(BlindSearchOutcome::Found { msg, candidate: candidate as u32 });
                }
            }
        }

        Ok(BlindSearchOutcome::NoMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::coreset::{max_candidates_coreset, SearchSpaceType};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_msg(rng: &mut StdRng, rnti: u16, location: DciLocation, nof_bits: usize) -> DciMsg {
        let mut msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, rnti, location, nof_bits);
        for bit in msg.payload[..nof_bits].iter_mut() {
            *bit = rng.gen_range(0..2);
        }
        msg
    }

    fn engine(carrier: &Carrier, coreset: &Coreset) -> PdcchNr {
        let mut pdcch = PdcchNr::new(PdcchArgs { measure_evm: true, measure_time: true });
        pdcch.set_carrier(carrier, coreset).unwrap();
        pdcch
    }

    #[test]
    fn test_encode_decode_all_candidates() {
        let carrier = Carrier::default();
        let mut rng = StdRng::seed_from_u64(1234);
        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();

        for nof_freq_res in [1, 2, 4, 8] {
            for duration in 1..=3 {
                let coreset = Coreset::contiguous(0, nof_freq_res, duration);
                let mut pdcch = engine(&carrier, &coreset);
                let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);

                for slot in 0..2 {
                    for level in 0..NOF_AGGREGATION_LEVELS as u32 {
                        if max_candidates_coreset(&coreset, level) == 0 {
                            continue;
                        }
                        let locations = locations_coreset(&coreset, &ss, 0x1234, level, slot).unwrap();
                        for &ncce in locations.iter() {
                            grid.clear();
                            let location = DciLocation { level, ncce };
                            let tx = random_msg(&mut rng, 0x1234, location, 39);
                            pdcch.encode(&tx, &mut grid).unwrap();

                            let ce = PdcchChannelEstimate::ideal(PDCCH_DATA_RE_PER_CCE << level);
                            let mut rx = DciMsg::new(DciFormat::Format1_0, RntiType::C, 0x1234, location, 39);
                            let result = pdcch.decode(&grid, &ce, &mut rx).unwrap();

                            assert!(result.crc, "CRC failed: res={} dur={} L={} ncce={}", nof_freq_res, duration, level, ncce);
                            assert!(result.evm.unwrap() < 0.01);
                            assert_eq!(rx.bits(), tx.bits());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_blind_search_finds_first_candidate() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 6, 1);
        assert_eq!(coreset.nof_cce(), 6);
        let mut pdcch = engine(&carrier, &coreset);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);

        let slot = 3;
        let ncce = locations_coreset(&coreset, &ss, 0x1234, 0, slot).unwrap()[0];
        let mut rng = StdRng::seed_from_u64(7);
        let tx = random_msg(&mut rng, 0x1234, DciLocation { level: 0, ncce }, 20);

        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();
        pdcch.encode(&tx, &mut grid).unwrap();

        let search = DciSearch {
            rnti: 0x1234,
            rnti_type: RntiType::C,
            format: DciFormat::Format1_0,
            nof_bits: 20,
            slot,
            levels: 0..=2,
        };
        match pdcch.blind_search(&grid, &IdealChannel, &ss, &search).unwrap() {
            BlindSearchOutcome::Found { msg, candidate } => {
                assert_eq!(candidate, 0);
                assert_eq!(msg.location, DciLocation { level: 0, ncce });
                assert_eq!(msg.bits(), tx.bits());
            }
            BlindSearchOutcome::NoMatch => panic!("DCI not found"),
        }

        // Larger aggregation levels must not decode the same DCI for the RNTI
        for level in 1..=2 {
            if ss.nof_candidates[level as usize] == 0 {
                continue;
            }
            let locations = locations_coreset(&coreset, &ss, 0x1234, level, slot).unwrap();
            assert!(!locations.is_empty());
            for &ncce in locations.iter() {
                let location = DciLocation { level, ncce };
                let ce = PdcchChannelEstimate::ideal(PDCCH_DATA_RE_PER_CCE << level);
                let mut rx = DciMsg::new(DciFormat::Format1_0, RntiType::C, 0x1234, location, 20);
                let result = pdcch.decode(&grid, &ce, &mut rx).unwrap();
                assert!(!result.crc, "CRC passed at L={} ncce={}", aggregation_level_cces(level), ncce);
            }
        }
    }

    #[test]
    fn test_blind_search_other_rnti_no_match() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 6, 1);
        let mut pdcch = engine(&carrier, &coreset);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);

        let ncce = locations_coreset(&coreset, &ss, 0x1234, 0, 3).unwrap()[0];
        let mut rng = StdRng::seed_from_u64(8);
        let tx = random_msg(&mut rng, 0x1234, DciLocation { level: 0, ncce }, 20);
        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();
        pdcch.encode(&tx, &mut grid).unwrap();

        let search = DciSearch {
            rnti: 0x4321,
            rnti_type: RntiType::C,
            format: DciFormat::Format1_0,
            nof_bits: 20,
            slot: 3,
            levels: 0..=2,
        };
        assert_eq!(pdcch.blind_search(&grid, &IdealChannel, &ss, &search).unwrap(), BlindSearchOutcome::NoMatch);
    }

    #[test]
    fn test_empty_grid_no_match() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 8, 2);
        let mut pdcch = engine(&carrier, &coreset);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);
        let grid = ResourceGrid::new(carrier.nof_prb).unwrap();

        let search = DciSearch {
            rnti: 0x1234,
            rnti_type: RntiType::C,
            format: DciFormat::Format1_0,
            nof_bits: 39,
            slot: 0,
            levels: 0..=4,
        };
        assert_eq!(pdcch.blind_search(&grid, &IdealChannel, &ss, &search).unwrap(), BlindSearchOutcome::NoMatch);
    }

    #[test]
    fn test_dmrs_estimate_under_phase_rotation() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 4, 2);
        let mut pdcch = engine(&carrier, &coreset);
        let ss = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);

        let slot = 5;
        let location = DciLocation { level: 1, ncce: locations_coreset(&coreset, &ss, 0x4601, 1, slot).unwrap()[1] };
        let mut rng = StdRng::seed_from_u64(9);
        let tx = random_msg(&mut rng, 0x4601, location, 39);

        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();
        pdcch.encode(&tx, &mut grid).unwrap();
        pdcch.put_dmrs(slot, &location, &mut grid).unwrap();

        // Constant channel: gain 0.5, phase 1 rad
        let h = Complex32::from_polar(0.5, 1.0);
        for sc in 0..grid.nof_subcarriers() {
            for l in 0..2 {
                let re = grid.get(sc, l).unwrap();
                grid.set(sc, l, re * h);
            }
        }

        let estimator = DmrsEstimator { slot, n_id: carrier.pci, carrier_start: carrier.start };
        let search = DciSearch {
            rnti: 0x4601,
            rnti_type: RntiType::C,
            format: DciFormat::Format1_0,
            nof_bits: 39,
            slot,
            levels: 0..=4,
        };
        match pdcch.blind_search(&grid, &estimator, &ss, &search).unwrap() {
            BlindSearchOutcome::Found { msg, .. } => {
                assert_eq!(msg.location, location);
                assert_eq!(msg.bits(), tx.bits());
            }
            BlindSearchOutcome::NoMatch => panic!("DCI not found"),
        }
    }

    #[test]
    fn test_invalid_requests() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 1, 1);
        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();
        let msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, 1, DciLocation::default(), 20);

        let mut unconfigured = PdcchNr::new(PdcchArgs::default());
        assert_eq!(unconfigured.encode(&msg, &mut grid), Err(LayerError::NotInitialized));

        let mut pdcch = engine(&carrier, &coreset);
        let empty = DciMsg::new(DciFormat::Format1_0, RntiType::C, 1, DciLocation::default(), 0);
        assert!(pdcch.encode(&empty, &mut grid).is_err());

        // L=2 does not fit a single-CCE CORESET
        let wide = DciMsg::new(DciFormat::Format1_0, RntiType::C, 1, DciLocation { level: 1, ncce: 0 }, 20);
        assert!(pdcch.encode(&wide, &mut grid).is_err());

        let mut small_grid = ResourceGrid::new(6).unwrap();
        assert!(pdcch.encode(&msg, &mut small_grid).is_err());
    }

    #[test]
    fn test_put_dmrs_rejects_smaller_grid() {
        let carrier = Carrier::default();
        let coreset = Coreset::contiguous(0, 8, 1);
        assert_eq!(coreset.nof_cce(), 8);
        let pdcch = engine(&carrier, &coreset);

        // CCE 7 maps beyond the 6 PRB of this grid
        let location = DciLocation { level: 0, ncce: 7 };
        let mut small_grid = ResourceGrid::new(6).unwrap();
        assert!(matches!(pdcch.put_dmrs(0, &location, &mut small_grid), Err(LayerError::InvalidState(_))));

        let mut grid = ResourceGrid::new(carrier.nof_prb).unwrap();
        assert!(pdcch.put_dmrs(0, &location, &mut grid).is_ok());
    }
}
