//! Shared Channel Transport Block Processing
//!
//! Reference kernel for PDSCH/PUSCH transport blocks: CRC24A attachment,
//! circular rate matching with a redundancy-version dependent start, and
//! soft combining of received LLRs. Soft buffers keep state across HARQ
//! transmissions; the receive buffer must be reset before a new transport
//! block is decoded into it.

use crate::LayerError;
use super::ra::{fill_tb, TbInfo, TimeAlloc};
use common::{bits_to_bytes, bytes_to_bits, crc24a, read_bits, write_bits, Carrier};
use tracing::{debug, trace};

/// Transport block CRC length
const TB_CRC_LEN: usize = 24;

/// Upper bound of coded bits a carrier can carry in one slot
pub fn max_codeword_bits(carrier: &Carrier) -> usize {
    carrier.nof_prb as usize * 156 * 6 * carrier.max_mimo_layers as usize
}

/// Transmit soft buffer: the CRC-protected codeword of the current transport block
#[derive(Debug, Clone)]
pub struct SoftBufferTx {
    bits: Vec<u8>,
    len: usize,
}

impl SoftBufferTx {
    pub fn new(max_bits: usize) -> Self {
        Self { bits: vec![0; max_bits], len: 0 }
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// Codeword length currently held, zero after reset
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Receive soft buffer: accumulated LLRs of the current transport block
#[derive(Debug, Clone)]
pub struct SoftBufferRx {
    llr: Vec<i16>,
    len: usize,
}

impl SoftBufferRx {
    pub fn new(max_bits: usize) -> Self {
        Self { llr: vec![0; max_bits], len: 0 }
    }

    /// Discard accumulated soft bits
    pub fn reset(&mut self) {
        self.llr[..self.len].fill(0);
        self.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.llr.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Soft buffer of a transport block: exactly one direction is ever in use
#[derive(Debug)]
pub enum SoftBufferRef<'a> {
    Tx(&'a mut SoftBufferTx),
    Rx(&'a mut SoftBufferRx),
}

/// Shared channel grant, as carried by a DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchGrant {
    pub rnti: u16,
    pub prb_start: u32,
    pub nof_prb: u32,
    pub time: TimeAlloc,
    pub nof_layers: u32,
    pub mcs: u32,
    pub rv: u32,
    pub ndi: u32,
    pub harq_id: u32,
}

impl SchGrant {
    /// Transport block size and coded bits of the grant
    pub fn tb_info(&self, carrier: &Carrier) -> Result<TbInfo, LayerError> {
        if self.prb_start + self.nof_prb > carrier.nof_prb {
            return Err(LayerError::InvalidConfiguration(format!(
                "PRB {}+{} outside carrier of {} PRB", self.prb_start, self.nof_prb, carrier.nof_prb
            )));
        }
        fill_tb(carrier, self.mcs, self.nof_prb, &self.time, self.nof_layers)
    }
}

/// One transport block in flight
#[derive(Debug)]
pub struct SchTb<'a> {
    pub info: TbInfo,
    pub rv: u32,
    pub softbuffer: SoftBufferRef<'a>,
}

/// Circular buffer start for a redundancy version
fn rv_start(rv: u32, k: usize) -> usize {
    (rv as usize % 4) * k / 4
}

/// Shared channel encoder/decoder
pub struct SchNr {
    carrier: Option<Carrier>,
    bits: Vec<u8>,
}

impl SchNr {
    pub fn new() -> Self {
        Self { carrier: None, bits: Vec::new() }
    }

    pub fn set_carrier(&mut self, carrier: &Carrier) -> Result<(), LayerError> {
        carrier.validate()?;
        self.bits.resize(max_codeword_bits(carrier), 0);
        self.carrier = Some(*carrier);
        Ok(())
    }

    fn check_tb(&self, info: &TbInfo, buffer_capacity: usize) -> Result<usize, LayerError> {
        if self.carrier.is_none() {
            return Err(LayerError::NotInitialized);
        }
        if info.tbs == 0 || info.tbs % 8 != 0 {
            return Err(LayerError::InvalidConfiguration(format!("TBS {} bits", info.tbs)));
        }
        let k = info.tbs as usize + TB_CRC_LEN;
        if k > buffer_capacity || k > self.bits.len() {
            return Err(LayerError::InvalidConfiguration(format!(
                "Codeword of {} bits exceeds soft buffer of {}", k, buffer_capacity
            )));
        }
        Ok(k)
    }

    /// Encode a transport block into `out` (one bit per byte, `info.nof_bits` long)
    ///
    /// With `data` the codeword is rebuilt and stored in the soft buffer;
    /// without it the stored codeword is retransmitted at the new RV.
    pub fn encode(&mut self, tb: &mut SchTb<'_>, data: Option<&[u8]>, out: &mut [u8]) -> Result<(), LayerError> {
        let buffer = match &mut tb.softbuffer {
            SoftBufferRef::Tx(buffer) => buffer,
            SoftBufferRef::Rx(_) => {
                return Err(LayerError::InvalidState("Encoding requires a transmit soft buffer".to_string()));
            }
        };
        let k = self.check_tb(&tb.info, buffer.capacity())?;
        if out.len() < tb.info.nof_bits {
            return Err(LayerError::InvalidConfiguration(format!(
                "Output of {} bits for {} coded bits", out.len(), tb.info.nof_bits
            )));
        }

        let tbs_bytes = tb.info.tbs as usize / 8;
        match data {
            Some(data) => {
                if data.len() < tbs_bytes {
                    return Err(LayerError::InvalidPdu(format!(
                        "{} bytes for a {} byte transport block", data.len(), tbs_bytes
                    )));
                }
                let data = &data[..tbs_bytes];
                bytes_to_bits(data, &mut buffer.bits[..tb.info.tbs as usize]);
                write_bits(&mut buffer.bits[tb.info.tbs as usize..k], crc24a(data), TB_CRC_LEN);
                buffer.len = k;
            }
            None if buffer.len != k => {
                return Err(LayerError::InvalidState(
                    "Retransmission without a stored codeword".to_string()
                ));
            }
            None => {}
        }

        let k0 = rv_start(tb.rv, k);
        for (j, bit) in out[..tb.info.nof_bits].iter_mut().enumerate() {
            *bit = buffer.bits[(k0 + j) % k];
        }

        trace!("Encoded TB of {} bits into {} bits, rv={}", tb.info.tbs, tb.info.nof_bits, tb.rv);
        Ok(())
    }

    /// Combine received LLRs into the soft buffer and decode
    ///
    /// Positive LLRs favour bit 0. Returns whether the CRC matched; `data`
    /// receives the decoded bytes either way.
    pub fn decode(&mut self, tb: &mut SchTb<'_>, llr: &[i8], data: &mut [u8]) -> Result<bool, LayerError> {
        let buffer = match &mut tb.softbuffer {
            SoftBufferRef::Rx(buffer) => buffer,
            SoftBufferRef::Tx(_) => {
                return Err(LayerError::InvalidState("Decoding requires a receive soft buffer".to_string()));
            }
        };
        let k = self.check_tb(&tb.info, buffer.capacity())?;
        let tbs = tb.info.tbs as usize;
        if llr.len() < tb.info.nof_bits || data.len() < tbs / 8 {
            return Err(LayerError::InvalidConfiguration("Decoder buffers too short".to_string()));
        }

        match buffer.len {
            0 => buffer.len = k,
            len if len != k => {
                return Err(LayerError::InvalidState(format!(
                    "Soft buffer holds a {} bit codeword, expected {}", len, k
                )));
            }
            _ => {}
        }

        let k0 = rv_start(tb.rv, k);
        for (j, &value) in llr[..tb.info.nof_bits].iter().enumerate() {
            let acc = &mut buffer.llr[(k0 + j) % k];
            *acc = acc.saturating_add(value as i16);
        }

        for (bit, &acc) in self.bits[..k].iter_mut().zip(&buffer.llr[..k]) {
            *bit = (acc < 0) as u8;
        }

        bits_to_bytes(&self.bits[..tbs], &mut data[..tbs / 8]);
        let crc_ok = read_bits(&self.bits[tbs..k], TB_CRC_LEN) == crc24a(&data[..tbs / 8]);
        debug!("Decoded TB of {} bits, rv={}, crc={}", tb.info.tbs, tb.rv, crc_ok);
        Ok(crc_ok)
    }
}

impl Default for SchNr {
    fn default() -> Self {
        Self::new()
    }
}
