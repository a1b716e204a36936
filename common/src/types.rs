//! Common Types for 5G GNodeB
//! 
//! Defines fundamental types used throughout the protocol stack

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::time::Duration;
use thiserror::Error;

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;
    
    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Subcarrier spacing for a numerology index (mu = 0..=4)
    pub fn from_numerology(numerology: u8) -> Option<Self> {
        if numerology > 4 {
            return None;
        }
        Self::from_u32(15u32 << numerology)
    }
}

/// Configuration errors raised by descriptor validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid carrier: {0}")]
    InvalidCarrier(String),
}

/// Carrier descriptor
///
/// Set once before processing begins and only replaced between subframe
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    /// Physical cell identity
    pub pci: u16,
    /// Numerology index (mu)
    pub numerology: u8,
    /// Number of resource blocks
    pub nof_prb: u32,
    /// Start offset in resource blocks
    pub start: u32,
    /// Maximum number of spatial layers
    pub max_mimo_layers: u32,
}

impl Carrier {
    /// Maximum carrier bandwidth in PRB
    pub const MAX_PRB: u32 = 275;
    /// Maximum number of spatial layers
    pub const MAX_LAYERS: u32 = 4;

    /// Check the descriptor is usable for processing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Pci::new(self.pci).is_none() {
            return Err(ConfigError::InvalidCarrier(format!("PCI {} out of range", self.pci)));
        }
        if SubcarrierSpacing::from_numerology(self.numerology).is_none() {
            return Err(ConfigError::InvalidCarrier(format!("numerology {} unsupported", self.numerology)));
        }
        if self.nof_prb == 0 || self.nof_prb > Self::MAX_PRB {
            return Err(ConfigError::InvalidCarrier(format!("{} PRB out of range", self.nof_prb)));
        }
        if self.max_mimo_layers == 0 || self.max_mimo_layers > Self::MAX_LAYERS {
            return Err(ConfigError::InvalidCarrier(format!(
                "{} layers out of range", self.max_mimo_layers
            )));
        }
        Ok(())
    }

    /// Number of slots in a 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 << self.numerology
    }

    /// Duration of one slot, the TTI of this carrier
    pub fn slot_duration(&self) -> Duration {
        Duration::from_micros(1000 >> self.numerology.min(4))
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self {
            pci: 0,
            numerology: 0,
            nof_prb: 50,
            start: 0,
            max_mimo_layers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }
    
    #[test]
    fn test_scs_from_numerology() {
        assert_eq!(SubcarrierSpacing::from_numerology(0), Some(SubcarrierSpacing::Scs15));
        assert_eq!(SubcarrierSpacing::from_numerology(1), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::from_numerology(4), Some(SubcarrierSpacing::Scs240));
        assert_eq!(SubcarrierSpacing::from_numerology(5), None);
    }

    #[test]
    fn test_slot_timing_per_numerology() {
        let mu1 = Carrier { numerology: 1, ..Carrier::default() };
        assert_eq!(mu1.slots_per_frame(), 20);
        assert_eq!(mu1.slot_duration(), Duration::from_micros(500));

        let mu3 = Carrier { numerology: 3, ..Carrier::default() };
        assert_eq!(mu3.slot_duration(), Duration::from_micros(125));
        assert_eq!(mu3.slot_duration() * mu3.slots_per_frame(), Duration::from_millis(10));
    }

    #[test]
    fn test_carrier_validation() {
        let carrier = Carrier::default();
        assert!(carrier.validate().is_ok());
        assert_eq!(carrier.slots_per_frame(), 10);
        assert_eq!(carrier.slot_duration(), Duration::from_millis(1));

        let bad_prb = Carrier { nof_prb: 276, ..carrier };
        assert!(bad_prb.validate().is_err());

        let bad_layers = Carrier { max_mimo_layers: 0, ..carrier };
        assert!(bad_layers.validate().is_err());

        let bad_pci = Carrier { pci: 2000, ..carrier };
        assert!(matches!(bad_pci.validate(), Err(ConfigError::InvalidCarrier(_))));
    }
}
