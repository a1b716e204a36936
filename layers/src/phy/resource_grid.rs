//! Resource Grid for one slot
//! 
//! Frequency-domain samples of one carrier: subcarrier 0 is the lowest
//! subcarrier of the carrier's first PRB.

use crate::LayerError;
use super::{NRE, NSYMB_PER_SLOT};
use common::Carrier;
use ndarray::Array2;
use num_complex::Complex32;
use num_traits::Zero;
use tracing::debug;

/// Resource grid for one slot
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 2D grid: [subcarriers, symbols]
    grid: Array2<Complex32>,
    /// Number of resource blocks
    nof_prb: u32,
}

impl ResourceGrid {
    /// Create a zeroed grid for `nof_prb` resource blocks
    pub fn new(nof_prb: u32) -> Result<Self, LayerError> {
        if nof_prb == 0 || nof_prb > Carrier::MAX_PRB {
            return Err(LayerError::InvalidConfiguration(
                format!("Resource grid with {} PRB", nof_prb)
            ));
        }

        let nof_subcarriers = nof_prb as usize * NRE;
        debug!("Creating resource grid with dimensions: ({}, {})", nof_subcarriers, NSYMB_PER_SLOT);
        
        Ok(Self {
            grid: Array2::zeros((nof_subcarriers, NSYMB_PER_SLOT)),
            nof_prb,
        })
    }

    /// Number of resource blocks
    pub fn nof_prb(&self) -> u32 {
        self.nof_prb
    }

    /// Number of subcarriers
    pub fn nof_subcarriers(&self) -> usize {
        self.grid.nrows()
    }
    
    /// Clear the entire grid
    pub fn clear(&mut self) {
        self.grid.fill(Complex32::zero());
    }
    
    /// Clear a specific symbol
    pub fn clear_symbol(&mut self, symbol: usize) {
        if symbol < NSYMB_PER_SLOT {
            self.grid.column_mut(symbol).fill(Complex32::zero());
        }
    }

    /// Get a resource element, `None` when out of bounds
    pub fn get(&self, subcarrier: usize, symbol: usize) -> Option<Complex32> {
        self.grid.get((subcarrier, symbol)).copied()
    }

    /// Write a resource element
    ///
    /// # Panics
    /// Panics if the coordinates are outside the grid.
    pub fn set(&mut self, subcarrier: usize, symbol: usize, value: Complex32) {
        self.grid[(subcarrier, symbol)] = value;
    }

    /// Copy another grid of the same size into this one
    pub fn copy_from(&mut self, other: &ResourceGrid) -> Result<(), LayerError> {
        if other.grid.dim() != self.grid.dim() {
            return Err(LayerError::InvalidState(format!(
                "Grid size mismatch: {:?} vs {:?}", other.grid.dim(), self.grid.dim()
            )));
        }
        self.grid.assign(&other.grid);
        Ok(())
    }

    /// Total energy of one symbol
    pub fn symbol_energy(&self, symbol: usize) -> f32 {
        if symbol >= NSYMB_PER_SLOT {
            return 0.0;
        }
        self.grid.column(symbol).iter().map(|re| re.norm_sqr()).sum()
    }
}
