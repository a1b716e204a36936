//! Protocol Stack Layers Library
//! 
//! Real-time baseband processing: the PHY subframe workers and control
//! channel engine, and the MAC-side PDU delivery path.

pub mod phy;
pub mod mac;

use common::{ConfigError, PoolError};
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Invalid protocol data unit: {0}")]
    InvalidPdu(String),
    
    #[error("Layer not initialized")]
    NotInitialized,
    
    #[error("PDU buffer pool exhausted")]
    PoolExhausted,

    #[error("PDU queue full")]
    QueueFull,
    
    #[error("Processing error: {0}")]
    ProcessingError(String),
    
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<PoolError> for LayerError {
    fn from(_: PoolError) -> Self {
        LayerError::PoolExhausted
    }
}

impl From<ConfigError> for LayerError {
    fn from(e: ConfigError) -> Self {
        LayerError::InvalidConfiguration(e.to_string())
    }
}
