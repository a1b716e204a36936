//! MAC PDU Handler
//!
//! Consumer side of the PDU queue: checks every delivered PDU against the
//! payload the scheduler generated for it and keeps per-UE counters.

use super::pdu_queue::{Channel, PduCallback};
use super::scheduler::{build_payload, parse_pdu_header};
use common::bytes_to_hex;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Receive counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacRxStats {
    pub pdus: u64,
    pub bytes: u64,
    /// PDUs whose content did not match the scheduled payload
    pub corrupted: u64,
    /// PDUs per RNTI, sorted by RNTI
    pub per_ue: Vec<(u16, u64)>,
}

/// Verifying PDU consumer
#[derive(Debug, Default)]
pub struct MacPduHandler {
    pdus: AtomicU64,
    bytes: AtomicU64,
    corrupted: AtomicU64,
    per_ue: Mutex<HashMap<u16, u64>>,
}

impl MacPduHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MacRxStats {
        let mut per_ue: Vec<(u16, u64)> = self.per_ue.lock().iter().map(|(&k, &v)| (k, v)).collect();
        per_ue.sort_unstable();
        MacRxStats {
            pdus: self.pdus.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            per_ue,
        }
    }
}

impl PduCallback for MacPduHandler {
    fn process_pdu(&self, pdu: &[u8], channel: Channel) {
        self.pdus.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(pdu.len() as u64, Ordering::Relaxed);

        let Some((rnti, tti)) = parse_pdu_header(pdu) else {
            warn!("Runt PDU of {} bytes on {:?}", pdu.len(), channel);
            self.corrupted.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if build_payload(rnti, tti, pdu.len()) != pdu {
            warn!(
                "PDU for RNTI 0x{:04x} tti={} does not match its schedule: {}",
                rnti, tti, bytes_to_hex(&pdu[..pdu.len().min(16)])
            );
            self.corrupted.fetch_add(1, Ordering::Relaxed);
            return;
        }

        trace!("PDU for RNTI 0x{:04x} tti={} ({} bytes)", rnti, tti, pdu.len());
        *self.per_ue.lock().entry(rnti).or_insert(0) += 1;
    }
}
