//! Downlink Control Information
//! 
//! DCI message container and the format 1_0 field layout
//! (3GPP TS 38.212 Section 7.3.1).

use crate::LayerError;
use super::{DCI_MAX_BITS, NOF_AGGREGATION_LEVELS};
use common::{read_bits, write_bits, Carrier};

/// DCI format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormat {
    /// Uplink grant
    Format0_0,
    /// Downlink assignment
    Format1_0,
}

/// RNTI type the CRC is masked with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RntiType {
    C,
    Tc,
    Ra,
    P,
    Si,
}

/// PDCCH candidate position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DciLocation {
    /// Aggregation level index (L = 2^level CCEs)
    pub level: u32,
    /// First CCE
    pub ncce: u32,
}

impl DciLocation {
    pub fn is_valid(&self) -> bool {
        (self.level as usize) < NOF_AGGREGATION_LEVELS
    }
}

/// DCI message: unpacked payload bits plus addressing
#[derive(Debug, Clone, PartialEq)]
pub struct DciMsg {
    pub format: DciFormat,
    pub rnti_type: RntiType,
    pub rnti: u16,
    pub location: DciLocation,
    /// Payload length in bits
    pub nof_bits: usize,
    /// Payload, one bit per byte
    pub payload: [u8; DCI_MAX_BITS],
}

impl DciMsg {
    pub fn new(format: DciFormat, rnti_type: RntiType, rnti: u16, location: DciLocation, nof_bits: usize) -> Self {
        Self {
            format,
            rnti_type,
            rnti,
            location,
            nof_bits,
            payload: [0; DCI_MAX_BITS],
        }
    }

    /// Payload bits
    pub fn bits(&self) -> &[u8] {
        &self.payload[..self.nof_bits.min(DCI_MAX_BITS)]
    }
}

/// Bits of the frequency domain resource assignment for `n_rb` PRB
pub fn freq_domain_bits(n_rb: u32) -> usize {
    let n = n_rb as u64 * (n_rb as u64 + 1) / 2;
    if n <= 1 {
        0
    } else {
        (64 - (n - 1).leading_zeros()) as usize
    }
}

/// DCI payload size in bits
///
/// Format 0_0 is padded to the size of format 1_0, and all format 1_0
/// variants share one size, so only the carrier bandwidth matters.
pub fn dci_size(format: DciFormat, rnti_type: RntiType, carrier: &Carrier) -> usize {
    let f = freq_domain_bits(carrier.nof_prb);
    match (format, rnti_type) {
        // Short messages (10) + TDRA (4) + VRB (1) + MCS (5) + TB scaling (2) + reserved (6)
        (DciFormat::Format1_0, RntiType::P) => f + 28,
        // TDRA (4) + VRB (1) + MCS (5) + RV (2) + SI indicator (1) + reserved (15)
        (DciFormat::Format1_0, RntiType::Si) => f + 28,
        // TDRA (4) + VRB (1) + MCS (5) + TB scaling (2) + reserved (16)
        (DciFormat::Format1_0, RntiType::Ra) => f + 28,
        (DciFormat::Format1_0, _) | (DciFormat::Format0_0, _) => f + DlDci::FIXED_BITS,
    }
}

/// Downlink assignment, DCI format 1_0 scrambled by C-RNTI or TC-RNTI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlDci {
    /// Resource indication value
    pub freq_domain_assignment: u32,
    pub time_domain_assignment: u32,
    pub vrb_to_prb_mapping: u32,
    pub mcs: u32,
    pub ndi: u32,
    pub rv: u32,
    pub harq_id: u32,
    pub dai: u32,
    pub tpc: u32,
    pub pucch_resource: u32,
    pub harq_feedback: u32,
}

impl DlDci {
    /// Bits besides the frequency domain assignment
    const FIXED_BITS: usize = 1 + 4 + 1 + 5 + 1 + 2 + 4 + 2 + 2 + 3 + 3;

    fn fields(&self, f: usize) -> [(u32, usize, &'static str); 12] {
        [
            // Identifier for DCI formats: 1 = downlink
            (1, 1, "identifier"),
            (self.freq_domain_assignment, f, "frequency domain assignment"),
            (self.time_domain_assignment, 4, "time domain assignment"),
            (self.vrb_to_prb_mapping, 1, "VRB-to-PRB mapping"),
            (self.mcs, 5, "MCS"),
            (self.ndi, 1, "NDI"),
            (self.rv, 2, "RV"),
            (self.harq_id, 4, "HARQ process"),
            (self.dai, 2, "DAI"),
            (self.tpc, 2, "TPC"),
            (self.pucch_resource, 3, "PUCCH resource"),
            (self.harq_feedback, 3, "HARQ feedback timing"),
        ]
    }

    /// Pack into the payload of `msg`, setting its size
    pub fn pack(&self, carrier: &Carrier, msg: &mut DciMsg) -> Result<(), LayerError> {
        if msg.format != DciFormat::Format1_0 || !matches!(msg.rnti_type, RntiType::C | RntiType::Tc) {
            return Err(LayerError::InvalidConfiguration(format!(
                "Cannot pack DL assignment as {:?} {:?}", msg.format, msg.rnti_type
            )));
        }

        let f = freq_domain_bits(carrier.nof_prb);
        let mut offset = 0;
        for (value, width, name) in self.fields(f) {
            if width < 32 && value >> width != 0 {
                return Err(LayerError::InvalidConfiguration(
                    format!("{} value {} does not fit in {} bits", name, value, width)
                ));
            }
            offset += write_bits(&mut msg.payload[offset..], value, width);
        }

        msg.nof_bits = offset;
        Ok(())
    }

    /// Unpack from a received message
    pub fn unpack(carrier: &Carrier, msg: &DciMsg) -> Result<Self, LayerError> {
        let f = freq_domain_bits(carrier.nof_prb);
        let expected = f + Self::FIXED_BITS;
        if msg.nof_bits != expected {
            return Err(LayerError::InvalidPdu(format!(
                "DCI 1_0 size {} (expected {})", msg.nof_bits, expected
            )));
        }

        let bits = msg.bits();
        if bits[0] != 1 {
            return Err(LayerError::InvalidPdu("DCI format identifier is not downlink".to_string()));
        }

        let mut offset = 1;
        let mut next = |width: usize| {
            let value = read_bits(&bits[offset..], width);
            offset += width;
            value
        };

        Ok(Self {
            freq_domain_assignment: next(f),
            time_domain_assignment: next(4),
            vrb_to_prb_mapping: next(1),
            mcs: next(5),
            ndi: next(1),
            rv: next(2),
            harq_id: next(4),
            dai: next(2),
            tpc: next(2),
            pucch_resource: next(3),
            harq_feedback: next(3),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freq_domain_bits() {
        assert_eq!(freq_domain_bits(1), 0);
        assert_eq!(freq_domain_bits(24), 9);
        assert_eq!(freq_domain_bits(50), 11);
        assert_eq!(freq_domain_bits(273), 16);
    }

    #[test]
    fn test_dci_sizes_aligned() {
        let carrier = Carrier::default();
        let c = dci_size(DciFormat::Format1_0, RntiType::C, &carrier);
        assert_eq!(c, 39);
        assert_eq!(dci_size(DciFormat::Format0_0, RntiType::C, &carrier), c);
        assert_eq!(dci_size(DciFormat::Format1_0, RntiType::Si, &carrier), c);
        assert_eq!(dci_size(DciFormat::Format1_0, RntiType::P, &carrier), c);
    }

    #[test]
    fn test_dl_dci_fields_survive_packing() {
        let carrier = Carrier::default();
        let dci = DlDci {
            freq_domain_assignment: 1077,
            time_domain_assignment: 3,
            vrb_to_prb_mapping: 0,
            mcs: 27,
            ndi: 1,
            rv: 2,
            harq_id: 9,
            dai: 1,
            tpc: 1,
            pucch_resource: 5,
            harq_feedback: 4,
        };
        let mut msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, 0x4601, DciLocation::default(), 0);
        dci.pack(&carrier, &mut msg).unwrap();
        assert_eq!(msg.nof_bits, 39);
        assert_eq!(msg.bits()[0], 1);
        assert_eq!(DlDci::unpack(&carrier, &msg).unwrap(), dci);
    }

    #[test]
    fn test_pack_rejects_oversized_field() {
        let carrier = Carrier::default();
        let dci = DlDci { mcs: 32, ..Default::default() };
        let mut msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, 1, DciLocation::default(), 0);
        assert!(dci.pack(&carrier, &mut msg).is_err());

        let mut si = DciMsg::new(DciFormat::Format1_0, RntiType::Si, 0xFFFF, DciLocation::default(), 0);
        assert!(DlDci::default().pack(&carrier, &mut si).is_err());
    }

    #[test]
    fn test_unpack_rejects_uplink_identifier() {
        let carrier = Carrier::default();
        let msg = DciMsg::new(DciFormat::Format1_0, RntiType::C, 1, DciLocation::default(), 39);
        assert!(matches!(DlDci::unpack(&carrier, &msg), Err(LayerError::InvalidPdu(_))));
    }
}
