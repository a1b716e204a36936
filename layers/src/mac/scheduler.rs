//! MAC Scheduler
//!
//! Deterministic round-robin downlink scheduler: every scheduling period
//! each carrier gets one grant for the next UE in the list. Payloads are
//! reproducible from (RNTI, TTI) so the receive side can verify them, and
//! are generated straight into the worker's transmit buffer.

use crate::phy::ra::time_default_a;
use crate::phy::sch::SchGrant;
use crate::phy::NOF_AGGREGATION_LEVELS;
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::Carrier;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, warn};

/// RNTI (2 bytes) and TTI (4 bytes) at the start of every generated PDU
pub const PDU_HEADER_LEN: usize = 6;

/// HARQ processes cycled through by the scheduler
const NOF_HARQ_PROCESSES: u32 = 16;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// UEs served in round-robin order
    pub ues: Vec<u16>,
    pub mcs: u32,
    /// PRB per grant
    pub nof_prb: u32,
    /// Aggregation level index of the scheduling DCI
    pub aggregation_level: u32,
    /// Schedule every `period` TTIs
    pub period: u32,
    /// Row of the default time-domain allocation table
    pub time_alloc_row: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ues: vec![0x4601],
            mcs: 9,
            nof_prb: 10,
            aggregation_level: 1,
            period: 1,
            time_alloc_row: 0,
        }
    }
}

/// Downlink grant for one UE on one carrier
#[derive(Debug, Clone, PartialEq)]
pub struct DlGrant {
    pub rnti: u16,
    /// Aggregation level index of the DCI
    pub aggregation_level: u32,
    /// PDCCH candidate index within the level
    pub candidate: u32,
    pub sch: SchGrant,
    /// MAC PDU length, exactly one transport block; contents come from [`fill_payload`]
    pub payload_len: usize,
}

/// Scheduling decision for one carrier in one TTI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSchedule {
    pub tti: u32,
    pub cc_idx: u32,
    pub dl_grants: Vec<DlGrant>,
}

/// MAC scheduler
pub struct MacScheduler {
    config: SchedulerConfig,
    carriers: Vec<Carrier>,
}

impl MacScheduler {
    /// Create a new MAC scheduler for the given carriers
    pub fn new(config: SchedulerConfig, carriers: &[Carrier]) -> Result<Self, LayerError> {
        if config.period == 0 {
            return Err(LayerError::InvalidConfiguration("Scheduling period of 0 TTI".to_string()));
        }
        if config.aggregation_level as usize >= NOF_AGGREGATION_LEVELS {
            return Err(LayerError::InvalidConfiguration(format!(
                "Aggregation level index {}", config.aggregation_level
            )));
        }

        // Every grant must carry at least the PDU header
        for carrier in carriers {
            let grant = Self::sch_grant(&config, 0, 0)?;
            let tb = grant.tb_info(carrier)?;
            if (tb.tbs as usize / 8) < PDU_HEADER_LEN {
                return Err(LayerError::InvalidConfiguration(format!(
                    "TBS of {} bits cannot carry a PDU header", tb.tbs
                )));
            }
        }

        debug!(
            "MAC scheduler: {} UEs on {} carriers, MCS {} over {} PRB",
            config.ues.len(), carriers.len(), config.mcs, config.nof_prb
        );

        Ok(Self {
            config,
            carriers: carriers.to_vec(),
        })
    }

    fn sch_grant(config: &SchedulerConfig, rnti: u16, round: u32) -> Result<SchGrant, LayerError> {
        Ok(SchGrant {
            rnti,
            prb_start: 0,
            nof_prb: config.nof_prb,
            time: time_default_a(config.time_alloc_row)?,
            nof_layers: 1,
            mcs: config.mcs,
            rv: 0,
            ndi: (round / NOF_HARQ_PROCESSES) % 2,
            harq_id: round % NOF_HARQ_PROCESSES,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get schedule for a carrier in a TTI
    pub fn get_slot_schedule(&self, tti: u32, cc_idx: u32) -> SlotSchedule {
        let mut schedule = SlotSchedule::default();
        self.fill_slot_schedule(tti, cc_idx, &mut schedule);
        schedule
    }

    /// Overwrite `schedule` with the decision for a carrier in a TTI
    ///
    /// The grant list keeps its allocation between calls.
    pub fn fill_slot_schedule(&self, tti: u32, cc_idx: u32, schedule: &mut SlotSchedule) {
        schedule.tti = tti;
        schedule.cc_idx = cc_idx;
        schedule.dl_grants.clear();

        let Some(carrier) = self.carriers.get(cc_idx as usize) else {
            warn!("Schedule requested for unknown carrier {}", cc_idx);
            return;
        };
        if self.config.ues.is_empty() || tti % self.config.period != 0 {
            return;
        }

        let round = tti / self.config.period;
        let rnti = self.config.ues[(round as usize + cc_idx as usize) % self.config.ues.len()];

        let grant = match Self::sch_grant(&self.config, rnti, round) {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Cannot build grant for RNTI 0x{:04x}: {}", rnti, e);
                return;
            }
        };
        let tb = match grant.tb_info(carrier) {
            Ok(tb) => tb,
            Err(e) => {
                warn!("Cannot size TB for RNTI 0x{:04x}: {}", rnti, e);
                return;
            }
        };

        schedule.dl_grants.push(DlGrant {
            rnti,
            aggregation_level: self.config.aggregation_level,
            candidate: 0,
            sch: grant,
            payload_len: tb.tbs as usize / 8,
        });

        debug!("Scheduled RNTI 0x{:04x} on cc={} tti={} ({} bits)", rnti, cc_idx, tti, tb.tbs);
    }
}

/// Write the deterministic PDU for (RNTI, TTI) over the whole of `out`
pub fn fill_payload(rnti: u16, tti: u32, out: &mut [u8]) {
    let mut header = [0u8; PDU_HEADER_LEN];
    header[..2].copy_from_slice(&rnti.to_be_bytes());
    header[2..].copy_from_slice(&tti.to_be_bytes());
    let n = out.len().min(PDU_HEADER_LEN);
    out[..n].copy_from_slice(&header[..n]);

    if out.len() > PDU_HEADER_LEN {
        StdRng::seed_from_u64(((rnti as u64) << 32) | tti as u64).fill_bytes(&mut out[PDU_HEADER_LEN..]);
    }
}

/// Generate the deterministic PDU for (RNTI, TTI)
pub fn build_payload(rnti: u16, tti: u32, len: usize) -> Bytes {
    let mut payload = BytesMut::zeroed(len);
    fill_payload(rnti, tti, &mut payload);
    payload.freeze()
}

/// Read (RNTI, TTI) back from a PDU header
pub fn parse_pdu_header(pdu: &[u8]) -> Option<(u16, u32)> {
    if pdu.len() < PDU_HEADER_LEN {
        return None;
    }
    let rnti = u16::from_be_bytes([pdu[0], pdu[1]]);
    let tti = u32::from_be_bytes([pdu[2], pdu[3], pdu[4], pdu[5]]);
    Some((rnti, tti))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(config: SchedulerConfig) -> MacScheduler {
        MacScheduler::new(config, &[Carrier::default(), Carrier::default()]).unwrap()
    }

    #[test]
    fn test_round_robin() {
        let scheduler = scheduler(SchedulerConfig {
            ues: vec![0x4601, 0x4602, 0x4603],
            ..Default::default()
        });

        let rntis: Vec<u16> = (0..6)
            .map(|tti| scheduler.get_slot_schedule(tti, 0).dl_grants[0].rnti)
            .collect();
        assert_eq!(rntis, vec![0x4601, 0x4602, 0x4603, 0x4601, 0x4602, 0x4603]);

        // Second carrier is offset by one UE
        assert_eq!(scheduler.get_slot_schedule(0, 1).dl_grants[0].rnti, 0x4602);
        assert!(scheduler.get_slot_schedule(0, 2).dl_grants.is_empty());
    }

    #[test]
    fn test_period_and_harq() {
        let scheduler = scheduler(SchedulerConfig { period: 4, ..Default::default() });
        assert_eq!(scheduler.get_slot_schedule(4, 0).dl_grants.len(), 1);
        assert!(scheduler.get_slot_schedule(5, 0).dl_grants.is_empty());

        let grant = &scheduler.get_slot_schedule(4 * 17, 0).dl_grants[0];
        assert_eq!(grant.sch.harq_id, 1);
        assert_eq!(grant.sch.ndi, 1);
    }

    #[test]
    fn test_payload_matches_tb() {
        let scheduler = scheduler(SchedulerConfig::default());
        let grant = &scheduler.get_slot_schedule(7, 0).dl_grants[0];
        let tb = grant.sch.tb_info(&Carrier::default()).unwrap();
        assert_eq!(grant.payload_len, tb.tbs as usize / 8);

        let mut data = vec![0u8; grant.payload_len];
        fill_payload(grant.rnti, 7, &mut data);
        assert_eq!(parse_pdu_header(&data), Some((0x4601, 7)));
        assert_eq!(&data[..], &build_payload(0x4601, 7, grant.payload_len)[..]);
    }

    #[test]
    fn test_fill_payload_matches_build_payload() {
        for len in [0, 4, PDU_HEADER_LEN, 7, 64, 1000] {
            let mut out = vec![0xAAu8; len];
            fill_payload(0x4602, 33, &mut out);
            assert_eq!(&out[..], &build_payload(0x4602, 33, len)[..], "len={}", len);
        }
    }

    #[test]
    fn test_fill_slot_schedule_reuses_grant_list() {
        let scheduler = scheduler(SchedulerConfig { period: 2, ..Default::default() });
        let mut schedule = SlotSchedule::default();

        scheduler.fill_slot_schedule(0, 0, &mut schedule);
        assert_eq!(schedule.dl_grants.len(), 1);
        let storage = schedule.dl_grants.as_ptr();

        scheduler.fill_slot_schedule(1, 0, &mut schedule);
        assert_eq!((schedule.tti, schedule.cc_idx), (1, 0));
        assert!(schedule.dl_grants.is_empty());

        scheduler.fill_slot_schedule(2, 1, &mut schedule);
        assert_eq!(schedule.dl_grants.len(), 1);
        assert_eq!(schedule.dl_grants.as_ptr(), storage);
        assert_eq!(schedule, scheduler.get_slot_schedule(2, 1));
    }

    #[test]
    fn test_payload_is_deterministic() {
        let a = build_payload(0x4601, 100, 64);
        assert_eq!(a, build_payload(0x4601, 100, 64));
        assert_ne!(a, build_payload(0x4601, 101, 64));
        assert_eq!(parse_pdu_header(&a[..5]), None);
    }

    #[test]
    fn test_invalid_configuration() {
        let carriers = [Carrier::default()];
        assert!(MacScheduler::new(SchedulerConfig { period: 0, ..Default::default() }, &carriers).is_err());
        assert!(MacScheduler::new(SchedulerConfig { mcs: 29, ..Default::default() }, &carriers).is_err());
        assert!(MacScheduler::new(SchedulerConfig { nof_prb: 51, ..Default::default() }, &carriers).is_err());
        assert!(MacScheduler::new(SchedulerConfig { aggregation_level: 5, ..Default::default() }, &carriers).is_err());
    }

    #[test]
    fn test_no_ues_no_grants() {
        let scheduler = scheduler(SchedulerConfig { ues: vec![], ..Default::default() });
        assert!(scheduler.get_slot_schedule(0, 0).dl_grants.is_empty());
    }
}
