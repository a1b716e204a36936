//! Subframe Worker
//!
//! The unit of real-time work run by the PHY worker pool. One worker owns a
//! per-carrier processing context for every configured carrier plus the soft
//! buffers and scratch storage shared between them. Per TTI it encodes the
//! scheduled downlink control and data into the transmit buffers, and runs
//! the PDCCH blind search and transport block decoding on the receive
//! buffers, handing decoded PDUs to the MAC through the PDU queue.
//!
//! In loopback mode the receive buffers are filled from the transmit
//! buffers of the same TTI; otherwise the driver fills them through
//! [`SfWorker::rx_grid_mut`] and [`SfWorker::pdsch_rx_llr_mut`] while the
//! worker is reserved.

use crate::mac::{Channel, MacScheduler, PduQueue};
use crate::mac::scheduler::{fill_payload, DlGrant, SlotSchedule};
use crate::LayerError;
use super::coreset::{locations_coreset, Coreset, SearchSpace};
use super::dci::{dci_size, DciFormat, DciLocation, DciMsg, DlDci, RntiType};
use super::pdcch::{BlindSearchOutcome, DciSearch, DmrsEstimator, PdcchArgs, PdcchNr};
use super::ra::{riv_decode, riv_encode, time_default_a, time_default_a_index};
use super::resource_grid::ResourceGrid;
use super::sch::{max_codeword_bits, SchGrant, SchNr, SchTb, SoftBufferRef, SoftBufferRx, SoftBufferTx};
use super::{aggregation_level_cces, NOF_AGGREGATION_LEVELS};
use common::{Carrier, Worker};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Counters shared by all workers
#[derive(Debug, Default)]
pub struct PhyStats {
    dci_tx: AtomicU64,
    dci_rx: AtomicU64,
    pdsch_tx: AtomicU64,
    pdsch_crc_ok: AtomicU64,
    pdsch_crc_ko: AtomicU64,
    pdus_pushed: AtomicU64,
    pdus_dropped: AtomicU64,
    grants_skipped: AtomicU64,
}

/// Point-in-time copy of [`PhyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhyStatsSnapshot {
    pub dci_tx: u64,
    pub dci_rx: u64,
    pub pdsch_tx: u64,
    pub pdsch_crc_ok: u64,
    pub pdsch_crc_ko: u64,
    pub pdus_pushed: u64,
    pub pdus_dropped: u64,
    pub grants_skipped: u64,
}

impl PhyStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PhyStatsSnapshot {
        PhyStatsSnapshot {
            dci_tx: self.dci_tx.load(Ordering::Relaxed),
            dci_rx: self.dci_rx.load(Ordering::Relaxed),
            pdsch_tx: self.pdsch_tx.load(Ordering::Relaxed),
            pdsch_crc_ok: self.pdsch_crc_ok.load(Ordering::Relaxed),
            pdsch_crc_ko: self.pdsch_crc_ko.load(Ordering::Relaxed),
            pdus_pushed: self.pdus_pushed.load(Ordering::Relaxed),
            pdus_dropped: self.pdus_dropped.load(Ordering::Relaxed),
            grants_skipped: self.grants_skipped.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every worker of the pool
pub struct PhyCommon {
    pub scheduler: MacScheduler,
    pub pdu_queue: Arc<PduQueue>,
    pub stats: PhyStats,
}

impl PhyCommon {
    pub fn new(scheduler: MacScheduler, pdu_queue: Arc<PduQueue>) -> Self {
        Self {
            scheduler,
            pdu_queue,
            stats: PhyStats::default(),
        }
    }
}

/// Carrier configuration of one component carrier
#[derive(Debug, Clone, PartialEq)]
pub struct CcConfig {
    pub carrier: Carrier,
    pub coreset: Coreset,
    pub search_space: SearchSpace,
}

/// Worker behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct SfWorkerConfig {
    /// Feed the transmit buffers back into the receive path
    pub loopback: bool,
    /// RNTIs blind-searched on every carrier
    pub monitored_rntis: Vec<u16>,
    pub pdcch: PdcchArgs,
    /// Magnitude of loopback LLRs
    pub llr_magnitude: i8,
}

impl Default for SfWorkerConfig {
    fn default() -> Self {
        Self {
            loopback: true,
            monitored_rntis: Vec::new(),
            pdcch: PdcchArgs::default(),
            llr_magnitude: 10,
        }
    }
}

/// Processing context of one component carrier
struct CcWorker {
    cc_idx: u32,
    config: CcConfig,
    pdcch_tx: PdcchNr,
    pdcch_rx: PdcchNr,
    sch_tx: SchNr,
    sch_rx: SchNr,
    tx_grid: ResourceGrid,
    rx_grid: ResourceGrid,
    pdsch_tx_bits: Vec<u8>,
    pdsch_rx_llr: Vec<i8>,
    cce_used: Vec<bool>,
    schedule: SlotSchedule,
}

impl CcWorker {
    fn new(cc_idx: u32, config: CcConfig, args: PdcchArgs) -> Result<Self, LayerError> {
        let mut pdcch_tx = PdcchNr::new(args);
        let mut pdcch_rx = PdcchNr::new(args);
        let mut sch_tx = SchNr::new();
        let mut sch_rx = SchNr::new();
        Self::configure(&config, &mut pdcch_tx, &mut pdcch_rx, &mut sch_tx, &mut sch_rx)?;

        let nof_bits = max_codeword_bits(&config.carrier);
        Ok(Self {
            cc_idx,
            tx_grid: ResourceGrid::new(config.carrier.nof_prb)?,
            rx_grid: ResourceGrid::new(config.carrier.nof_prb)?,
            pdsch_tx_bits: vec![0; nof_bits],
            pdsch_rx_llr: vec![0; nof_bits],
            cce_used: vec![false; config.coreset.nof_cce() as usize],
            schedule: SlotSchedule::default(),
            config,
            pdcch_tx,
            pdcch_rx,
            sch_tx,
            sch_rx,
        })
    }

    fn configure(
        config: &CcConfig,
        pdcch_tx: &mut PdcchNr,
        pdcch_rx: &mut PdcchNr,
        sch_tx: &mut SchNr,
        sch_rx: &mut SchNr,
    ) -> Result<(), LayerError> {
        if config.search_space.coreset_id != config.coreset.id {
            return Err(LayerError::InvalidConfiguration(format!(
                "Search space {} refers to CORESET {}, carrier uses CORESET {}",
                config.search_space.id, config.search_space.coreset_id, config.coreset.id
            )));
        }
        pdcch_tx.set_carrier(&config.carrier, &config.coreset)?;
        pdcch_rx.set_carrier(&config.carrier, &config.coreset)?;
        sch_tx.set_carrier(&config.carrier)?;
        sch_rx.set_carrier(&config.carrier)?;
        Ok(())
    }

    /// Coded bit offset of a PRB in the PDSCH buffers
    fn bit_offset(&self, prb: u32) -> usize {
        let carrier = &self.config.carrier;
        prb as usize * max_codeword_bits(carrier) / carrier.nof_prb as usize
    }

    fn transmit(&mut self, tti: u32, phy: &PhyCommon, softbuffer: &mut SoftBufferTx, data: &mut [u8]) {
        self.tx_grid.clear();
        self.pdsch_tx_bits.fill(0);
        self.cce_used.fill(false);

        let slot = tti % self.config.carrier.slots_per_frame();
        let mut schedule = std::mem::take(&mut self.schedule);
        phy.scheduler.fill_slot_schedule(tti, self.cc_idx, &mut schedule);
        for grant in &schedule.dl_grants {
            match self.transmit_grant(tti, slot, grant, softbuffer, data) {
                Ok(()) => {
                    PhyStats::inc(&phy.stats.dci_tx);
                    PhyStats::inc(&phy.stats.pdsch_tx);
                }
                Err(e) => {
                    warn!("cc={} tti={}: skipping grant for RNTI 0x{:04x}: {}", self.cc_idx, tti, grant.rnti, e);
                    PhyStats::inc(&phy.stats.grants_skipped);
                }
            }
        }
        self.schedule = schedule;
    }

    fn transmit_grant(
        &mut self,
        tti: u32,
        slot: u32,
        grant: &DlGrant,
        softbuffer: &mut SoftBufferTx,
        data: &mut [u8],
    ) -> Result<(), LayerError> {
        let carrier = self.config.carrier;
        let level = grant.aggregation_level;
        if level as usize >= NOF_AGGREGATION_LEVELS || self.config.search_space.nof_candidates[level as usize] == 0 {
            return Err(LayerError::InvalidConfiguration(format!("No candidates at aggregation level index {}", level)));
        }

        let locations = locations_coreset(&self.config.coreset, &self.config.search_space, grant.rnti, level, slot)?;
        let ncce = *locations.get(grant.candidate as usize).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("Candidate {} not in search space", grant.candidate))
        })?;

        let cces = ncce as usize..(ncce + aggregation_level_cces(level)) as usize;
        if self.cce_used[cces.clone()].iter().any(|&used| used) {
            return Err(LayerError::InvalidState(format!("CCE {} already allocated", ncce)));
        }

        let tb = grant.sch.tb_info(&carrier)?;
        let offset = self.bit_offset(grant.sch.prb_start);
        if offset + tb.nof_bits > self.pdsch_tx_bits.len() {
            return Err(LayerError::InvalidConfiguration("PDSCH allocation exceeds the carrier".to_string()));
        }

        let time_row = time_default_a_index(&grant.sch.time).ok_or_else(|| {
            LayerError::InvalidConfiguration("Time allocation not in the default table".to_string())
        })?;
        let dci = DlDci {
            freq_domain_assignment: riv_encode(carrier.nof_prb, grant.sch.prb_start, grant.sch.nof_prb),
            time_domain_assignment: time_row,
            mcs: grant.sch.mcs,
            ndi: grant.sch.ndi,
            rv: grant.sch.rv,
            harq_id: grant.sch.harq_id,
            ..Default::default()
        };

        let location = DciLocation { level, ncce };
        let mut msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, grant.rnti, location, 0);
        dci.pack(&carrier, &mut msg)?;
        self.pdcch_tx.encode(&msg, &mut self.tx_grid)?;
        self.pdcch_tx.put_dmrs(slot, &location, &mut self.tx_grid)?;
        self.cce_used[cces].fill(true);

        let tbs_bytes = tb.tbs as usize / 8;
        let payload_len = grant.payload_len.min(tbs_bytes);
        fill_payload(grant.rnti, tti, &mut data[..payload_len]);
        data[payload_len..tbs_bytes].fill(0);

        softbuffer.reset();
        let mut tb_tx = SchTb { info: tb, rv: grant.sch.rv, softbuffer: SoftBufferRef::Tx(softbuffer) };
        self.sch_tx.encode(&mut tb_tx, Some(&data[..tbs_bytes]), &mut self.pdsch_tx_bits[offset..offset + tb.nof_bits])?;

        trace!(
            "cc={} slot={}: RNTI 0x{:04x} DCI at CCE {} L={}, TB {} bits",
            self.cc_idx, slot, grant.rnti, ncce, aggregation_level_cces(level), tb.tbs
        );
        Ok(())
    }

    fn loopback(&mut self, llr_magnitude: i8) -> Result<(), LayerError> {
        self.rx_grid.copy_from(&self.tx_grid)?;
        for (llr, &bit) in self.pdsch_rx_llr.iter_mut().zip(&self.pdsch_tx_bits) {
            *llr = if bit == 1 { -llr_magnitude } else { llr_magnitude };
        }
        Ok(())
    }

    fn receive(
        &mut self,
        tti: u32,
        rntis: &[u16],
        phy: &PhyCommon,
        softbuffer: &mut SoftBufferRx,
        data: &mut [u8],
    ) -> Result<(), LayerError> {
        let carrier = self.config.carrier;
        let slot = tti % carrier.slots_per_frame();
        let estimator = DmrsEstimator { slot, n_id: carrier.pci, carrier_start: carrier.start };
        let nof_bits = dci_size(DciFormat::Format1_0, RntiType::C, &carrier);

        for &rnti in rntis {
            let search = DciSearch {
                rnti,
                rnti_type: RntiType::C,
                format: DciFormat::Format1_0,
                nof_bits,
                slot,
                levels: 0..=(NOF_AGGREGATION_LEVELS as u32 - 1),
            };

            let msg = match self.pdcch_rx.blind_search(&self.rx_grid, &estimator, &self.config.search_space, &search)? {
                BlindSearchOutcome::Found { msg, .. } => msg,
                BlindSearchOutcome::NoMatch => {
                    trace!("cc={} tti={}: no DCI for RNTI 0x{:04x}", self.cc_idx, tti, rnti);
                    continue;
                }
            };
            PhyStats::inc(&phy.stats.dci_rx);

            match self.receive_pdsch(&msg, softbuffer, data) {
                Ok(Some(len)) => {
                    PhyStats::inc(&phy.stats.pdsch_crc_ok);
                    deliver_pdu(&phy.pdu_queue, &data[..len], &phy.stats);
                }
                Ok(None) => {
                    debug!("cc={} tti={}: PDSCH CRC failed for RNTI 0x{:04x}", self.cc_idx, tti, rnti);
                    PhyStats::inc(&phy.stats.pdsch_crc_ko);
                }
                Err(e) => {
                    warn!("cc={} tti={}: cannot decode PDSCH for RNTI 0x{:04x}: {}", self.cc_idx, tti, rnti, e);
                    PhyStats::inc(&phy.stats.pdsch_crc_ko);
                }
            }
        }

        Ok(())
    }

    /// Decode the PDSCH a DCI points at; returns the TB length on CRC success
    fn receive_pdsch(
        &mut self,
        msg: &DciMsg,
        softbuffer: &mut SoftBufferRx,
        data: &mut [u8],
    ) -> Result<Option<usize>, LayerError> {
        let carrier = self.config.carrier;
        let dci = DlDci::unpack(&carrier, msg)?;
        let (prb_start, nof_prb) = riv_decode(carrier.nof_prb, dci.freq_domain_assignment)
            .ok_or_else(|| LayerError::InvalidPdu(format!("RIV {}", dci.freq_domain_assignment)))?;

        let grant = SchGrant {
            rnti: msg.rnti,
            prb_start,
            nof_prb,
            time: time_default_a(dci.time_domain_assignment)?,
            nof_layers: 1,
            mcs: dci.mcs,
            rv: dci.rv,
            ndi: dci.ndi,
            harq_id: dci.harq_id,
        };
        let tb = grant.tb_info(&carrier)?;
        let offset = self.bit_offset(prb_start);
        if offset + tb.nof_bits > self.pdsch_rx_llr.len() {
            return Err(LayerError::InvalidPdu("PDSCH allocation exceeds the carrier".to_string()));
        }

        // Every grant starts a new transport block
        softbuffer.reset();
        let mut tb_rx = SchTb { info: tb, rv: grant.rv, softbuffer: SoftBufferRef::Rx(softbuffer) };
        let crc = self.sch_rx.decode(&mut tb_rx, &self.pdsch_rx_llr[offset..offset + tb.nof_bits], data)?;

        Ok(crc.then_some(tb.tbs as usize / 8))
    }
}

/// Copy a decoded PDU into a queue buffer; exhaustion drops it
fn deliver_pdu(queue: &PduQueue, pdu: &[u8], stats: &PhyStats) {
    let mut buffer = match queue.request(pdu.len()) {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!("Dropping {} byte PDU: {}", pdu.len(), e);
            PhyStats::inc(&stats.pdus_dropped);
            return;
        }
    };

    let result = match queue.write(&mut buffer, pdu) {
        Ok(len) => queue.push(buffer, len, Channel::Dch),
        Err(e) => {
            queue.deallocate(buffer);
            Err(e)
        }
    };
    match result {
        Ok(()) => PhyStats::inc(&stats.pdus_pushed),
        Err(e) => {
            warn!("Dropping {} byte PDU: {}", pdu.len(), e);
            PhyStats::inc(&stats.pdus_dropped);
        }
    }
}

/// Subframe worker
pub struct SfWorker {
    id: u32,
    phy: Arc<PhyCommon>,
    config: SfWorkerConfig,
    cc_workers: Vec<CcWorker>,
    softbuffer_tx: SoftBufferTx,
    softbuffer_rx: SoftBufferRx,
    data: Vec<u8>,
    tti: u32,
    last_tti: Option<u32>,
}

impl SfWorker {
    pub fn new(id: u32, phy: Arc<PhyCommon>, config: SfWorkerConfig) -> Self {
        Self {
            id,
            phy,
            config,
            cc_workers: Vec::new(),
            softbuffer_tx: SoftBufferTx::new(0),
            softbuffer_rx: SoftBufferRx::new(0),
            data: Vec::new(),
            tti: 0,
            last_tti: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn nof_carriers(&self) -> usize {
        self.cc_workers.len()
    }

    /// Configure carrier `cc_idx`, adding it when `cc_idx` equals the carrier count
    pub fn set_carrier(&mut self, cc_idx: u32, config: CcConfig) -> Result<(), LayerError> {
        let idx = cc_idx as usize;
        if idx > self.cc_workers.len() {
            return Err(LayerError::InvalidConfiguration(format!(
                "Carrier {} configured before carrier {}", cc_idx, self.cc_workers.len()
            )));
        }

        let max_bits = max_codeword_bits(&config.carrier);
        let cc = CcWorker::new(cc_idx, config, self.config.pdcch)?;
        if idx == self.cc_workers.len() {
            self.cc_workers.push(cc);
        } else {
            self.cc_workers[idx] = cc;
        }

        if max_bits > self.softbuffer_tx.capacity() {
            self.softbuffer_tx = SoftBufferTx::new(max_bits);
            self.softbuffer_rx = SoftBufferRx::new(max_bits);
            self.data = vec![0; max_bits / 8];
        }

        debug!("Worker {} carrier {} configured", self.id, cc_idx);
        Ok(())
    }

    /// Set the TTI processed by the next unit of work
    pub fn set_tti(&mut self, tti: u32) {
        self.tti = tti;
    }

    pub fn tti(&self) -> u32 {
        self.tti
    }

    /// TTI of the last completed unit of work
    pub fn last_processed_tti(&self) -> Option<u32> {
        self.last_tti
    }

    pub fn tx_grid(&self, cc_idx: u32) -> Option<&ResourceGrid> {
        self.cc_workers.get(cc_idx as usize).map(|cc| &cc.tx_grid)
    }

    pub fn rx_grid_mut(&mut self, cc_idx: u32) -> Option<&mut ResourceGrid> {
        self.cc_workers.get_mut(cc_idx as usize).map(|cc| &mut cc.rx_grid)
    }

    /// Coded PDSCH bits of the last TTI, one bit per byte
    pub fn pdsch_tx_bits(&self, cc_idx: u32) -> Option<&[u8]> {
        self.cc_workers.get(cc_idx as usize).map(|cc| cc.pdsch_tx_bits.as_slice())
    }

    /// PDSCH LLRs decoded by the next unit of work
    pub fn pdsch_rx_llr_mut(&mut self, cc_idx: u32) -> Option<&mut [i8]> {
        self.cc_workers.get_mut(cc_idx as usize).map(|cc| cc.pdsch_rx_llr.as_mut_slice())
    }

    /// Process the configured TTI on every carrier
    pub fn process(&mut self) -> Result<(), LayerError> {
        if self.cc_workers.is_empty() {
            return Err(LayerError::NotInitialized);
        }

        let tti = self.tti;
        let phy = &*self.phy;

        for cc in self.cc_workers.iter_mut() {
            cc.transmit(tti, phy, &mut self.softbuffer_tx, &mut self.data);
        }

        for cc in self.cc_workers.iter_mut() {
            if self.config.loopback {
                cc.loopback(self.config.llr_magnitude)?;
            }
            cc.receive(tti, &self.config.monitored_rntis, phy, &mut self.softbuffer_rx, &mut self.data)?;
        }

        self.last_tti = Some(tti);
        Ok(())
    }
}

impl Worker for SfWorker {
    fn work_imp(&mut self) {
        if let Err(e) = self.process() {
            error!("Worker {} failed on tti={}: {}", self.id, self.tti, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::{FullPolicy, MacPduHandler, PduQueueConfig, SchedulerConfig};
    use crate::phy::coreset::SearchSpaceType;
    use common::WorkerPool;

    const UES: [u16; 2] = [0x4601, 0x4602];

    fn cc_config(pci: u16) -> CcConfig {
        let carrier = Carrier { pci, ..Carrier::default() };
        let coreset = Coreset::contiguous(1, 8, 2);
        let search_space = SearchSpace::with_max_candidates(1, &coreset, SearchSpaceType::Ue);
        CcConfig { carrier, coreset, search_space }
    }

    fn phy_common(nof_carriers: usize, queue_capacity: usize) -> Arc<PhyCommon> {
        let carriers: Vec<Carrier> = (0..nof_carriers).map(|i| cc_config(i as u16).carrier).collect();
        let scheduler = MacScheduler::new(
            SchedulerConfig { ues: UES.to_vec(), ..Default::default() },
            &carriers,
        ).unwrap();
        let queue = PduQueue::new(PduQueueConfig {
            capacity: queue_capacity,
            full_policy: FullPolicy::Drop,
            ..Default::default()
        }).unwrap();
        Arc::new(PhyCommon::new(scheduler, Arc::new(queue)))
    }

    fn worker(id: u32, phy: &Arc<PhyCommon>, nof_carriers: u32) -> SfWorker {
        let config = SfWorkerConfig { monitored_rntis: UES.to_vec(), ..Default::default() };
        let mut worker = SfWorker::new(id, phy.clone(), config);
        for cc in 0..nof_carriers {
            worker.set_carrier(cc, cc_config(cc as u16)).unwrap();
        }
        worker
    }

    #[test]
    fn test_loopback_delivers_scheduled_pdus() {
        let phy = phy_common(1, 16);
        let handler = Arc::new(MacPduHandler::new());
        phy.pdu_queue.init(handler.clone());

        let mut worker = worker(0, &phy, 1);
        for tti in 0..4 {
            worker.set_tti(tti);
            worker.process().unwrap();
            assert_eq!(worker.last_processed_tti(), Some(tti));
        }

        let stats = phy.stats.snapshot();
        assert_eq!(stats.dci_tx, 4);
        assert_eq!(stats.dci_rx, 4);
        assert_eq!(stats.pdsch_crc_ok, 4);
        assert_eq!(stats.pdus_pushed, 4);
        assert_eq!(stats.grants_skipped, 0);

        assert!(phy.pdu_queue.process_pdus());
        let rx = handler.stats();
        assert_eq!(rx.pdus, 4);
        assert_eq!(rx.corrupted, 0);
        assert_eq!(rx.per_ue, vec![(0x4601, 2), (0x4602, 2)]);
    }

    #[test]
    fn test_two_carriers() {
        let phy = phy_common(2, 16);
        let handler = Arc::new(MacPduHandler::new());
        phy.pdu_queue.init(handler.clone());

        let mut worker = worker(0, &phy, 2);
        assert_eq!(worker.nof_carriers(), 2);
        worker.set_tti(0);
        worker.process().unwrap();

        let stats = phy.stats.snapshot();
        assert_eq!(stats.dci_tx, 2);
        assert_eq!(stats.pdsch_crc_ok, 2);

        phy.pdu_queue.process_pdus();
        assert_eq!(handler.stats().per_ue, vec![(0x4601, 1), (0x4602, 1)]);
    }

    #[test]
    fn test_pool_exhaustion_drops_pdus() {
        let phy = phy_common(1, 2);
        let mut worker = worker(0, &phy, 1);
        for tti in 0..3 {
            worker.set_tti(tti);
            worker.process().unwrap();
        }

        let stats = phy.stats.snapshot();
        assert_eq!(stats.pdus_pushed, 2);
        assert_eq!(stats.pdus_dropped, 1);
        assert_eq!(phy.pdu_queue.nof_pending(), 2);
    }

    #[test]
    fn test_external_rx_without_signal() {
        let phy = phy_common(1, 4);
        let mut worker = SfWorker::new(
            0,
            phy.clone(),
            SfWorkerConfig { loopback: false, monitored_rntis: UES.to_vec(), ..Default::default() },
        );
        worker.set_carrier(0, cc_config(0)).unwrap();
        worker.rx_grid_mut(0).unwrap().clear();
        worker.pdsch_rx_llr_mut(0).unwrap().fill(0);

        worker.set_tti(0);
        worker.process().unwrap();

        let stats = phy.stats.snapshot();
        assert_eq!(stats.dci_tx, 1);
        assert_eq!(stats.dci_rx, 0);
        assert!(worker.tx_grid(0).unwrap().symbol_energy(0) > 0.0);
        assert!(worker.pdsch_tx_bits(0).unwrap().iter().any(|&b| b == 1));
    }

    #[test]
    fn test_set_carrier_validation() {
        let phy = phy_common(1, 4);
        let mut worker = SfWorker::new(0, phy, SfWorkerConfig::default());
        assert_eq!(worker.process(), Err(LayerError::NotInitialized));
        assert!(worker.set_carrier(1, cc_config(0)).is_err());

        let mut bad = cc_config(0);
        bad.coreset = Coreset::contiguous(1, 9, 1);
        assert!(worker.set_carrier(0, bad).is_err());

        let mut mismatched = cc_config(0);
        mismatched.search_space.coreset_id = 2;
        assert!(worker.set_carrier(0, mismatched).is_err());

        worker.set_carrier(0, cc_config(0)).unwrap();
        worker.set_carrier(0, cc_config(3)).unwrap();
        assert_eq!(worker.nof_carriers(), 1);
    }

    #[test]
    fn test_workers_in_pool() {
        let phy = phy_common(1, 64);
        let pool: WorkerPool<SfWorker> = WorkerPool::new(2);
        for id in 0..2 {
            pool.init_worker(id, worker(id, &phy, 1), 0, common::threads::DEFAULT_AFFINITY_MASK).unwrap();
        }

        for tti in 0..10 {
            let mut reserved = pool.wait_worker(tti).unwrap();
            reserved.set_tti(tti);
            pool.start_worker(reserved);
        }
        for id in 0..2 {
            drop(pool.wait_worker_id(id).unwrap());
        }
        pool.stop();

        let stats = phy.stats.snapshot();
        assert_eq!(stats.pdsch_crc_ok, 10);
        assert_eq!(phy.pdu_queue.nof_pending(), 10);
    }
}
