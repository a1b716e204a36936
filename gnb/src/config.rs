//! YAML configuration of the baseband engine
//!
//! Every section and field is optional; a missing file section falls back to
//! the defaults below, so `EngineConfig::default()` runs a single 50 PRB
//! carrier serving one UE.

use anyhow::{anyhow, bail, Context};
use common::Carrier;
use layers::mac::{FullPolicy, PduQueueConfig, SchedulerConfig};
use layers::phy::{CcConfig, Coreset, PdcchArgs, SearchSpace, SearchSpaceType, SfWorkerConfig};
use layers::phy::NOF_AGGREGATION_LEVELS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Real-time worker pool
    #[serde(default)]
    pub workers: WorkersConfig,
    /// MAC PDU queue
    #[serde(default)]
    pub pdu_queue: PduQueueSection,
    /// Component carriers, in carrier index order
    #[serde(default = "default_cells")]
    pub cells: Vec<CellConfig>,
    /// Scheduled and monitored UEs
    #[serde(default)]
    pub ues: UesConfig,
    /// Subframe processing options
    #[serde(default)]
    pub phy: PhySection,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Subframe workers in the pool
    #[serde(default = "default_nof_workers")]
    pub nof_workers: u32,
    /// Real-time priority offset, 0 for the default scheduler
    #[serde(default)]
    pub priority: i32,
    /// CPU affinity mask of the subframe workers
    #[serde(default = "default_affinity_mask")]
    pub affinity_mask: u32,
    /// Threads of the background task pool
    #[serde(default = "default_background_workers")]
    pub background_workers: usize,
}

fn default_nof_workers() -> u32 {
    4
}

fn default_affinity_mask() -> u32 {
    common::threads::DEFAULT_AFFINITY_MASK
}

fn default_background_workers() -> usize {
    2
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            nof_workers: default_nof_workers(),
            priority: 0,
            affinity_mask: default_affinity_mask(),
            background_workers: default_background_workers(),
        }
    }
}

/// Queue-full behaviour as written in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FullPolicyKind {
    Block,
    Drop,
}

/// PDU queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PduQueueSection {
    /// Number of pooled PDU buffers
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Largest PDU in bytes
    #[serde(default = "default_max_pdu_len")]
    pub max_pdu_len: usize,
    /// What to do when every buffer is in use
    #[serde(default = "default_full_policy")]
    pub full_policy: FullPolicyKind,
    /// Wait for a free buffer under the `block` policy
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    layers::mac::pdu_queue::DEFAULT_POOL_SIZE
}

fn default_max_pdu_len() -> usize {
    layers::mac::pdu_queue::MAX_PDU_LEN
}

fn default_full_policy() -> FullPolicyKind {
    FullPolicyKind::Drop
}

fn default_push_timeout_ms() -> u64 {
    1
}

impl Default for PduQueueSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            max_pdu_len: default_max_pdu_len(),
            full_policy: default_full_policy(),
            push_timeout_ms: default_push_timeout_ms(),
        }
    }
}

/// Search space type as written in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SsType {
    Common,
    Ue,
}

/// Component carrier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Physical Cell ID
    #[serde(default)]
    pub pci: u16,
    /// Numerology index
    #[serde(default)]
    pub numerology: u8,
    /// Carrier bandwidth in PRB
    #[serde(default = "default_nof_prb")]
    pub nof_prb: u32,
    /// Carrier start in PRB
    #[serde(default)]
    pub start: u32,
    #[serde(default = "default_max_mimo_layers")]
    pub max_mimo_layers: u32,
    /// CORESET identifier
    #[serde(default = "default_coreset_id")]
    pub coreset_id: u32,
    /// Frequency resource bitmap, bit i enables PRBs 6i..6i+5
    ///
    /// Takes precedence over `coreset_nof_freq_res`.
    #[serde(default)]
    pub coreset_freq_resources: Option<u64>,
    /// Contiguous frequency resources from PRB 0
    #[serde(default = "default_coreset_nof_freq_res")]
    pub coreset_nof_freq_res: usize,
    /// CORESET duration in symbols
    #[serde(default = "default_coreset_duration")]
    pub coreset_duration: u32,
    #[serde(default = "default_search_space_id")]
    pub search_space_id: u32,
    #[serde(default = "default_search_space_type")]
    pub search_space_type: SsType,
    /// Candidates per aggregation level, CORESET maximum when absent
    #[serde(default)]
    pub nof_candidates: Option<Vec<u32>>,
}

fn default_cells() -> Vec<CellConfig> {
    vec![CellConfig::default()]
}

fn default_nof_prb() -> u32 {
    50
}

fn default_max_mimo_layers() -> u32 {
    1
}

fn default_coreset_id() -> u32 {
    1
}

fn default_coreset_nof_freq_res() -> usize {
    4
}

fn default_coreset_duration() -> u32 {
    2
}

fn default_search_space_id() -> u32 {
    1
}

fn default_search_space_type() -> SsType {
    SsType::Ue
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            pci: 0,
            numerology: 0,
            nof_prb: default_nof_prb(),
            start: 0,
            max_mimo_layers: default_max_mimo_layers(),
            coreset_id: default_coreset_id(),
            coreset_freq_resources: None,
            coreset_nof_freq_res: default_coreset_nof_freq_res(),
            coreset_duration: default_coreset_duration(),
            search_space_id: default_search_space_id(),
            search_space_type: default_search_space_type(),
            nof_candidates: None,
        }
    }
}

impl CellConfig {
    /// Build the validated carrier configuration
    pub fn to_cc_config(&self) -> anyhow::Result<CcConfig> {
        let carrier = Carrier {
            pci: self.pci,
            numerology: self.numerology,
            nof_prb: self.nof_prb,
            start: self.start,
            max_mimo_layers: self.max_mimo_layers,
        };
        carrier.validate()?;

        let coreset = match self.coreset_freq_resources {
            Some(bitmap) => Coreset::from_bitmap(self.coreset_id, bitmap, self.coreset_duration),
            None => Coreset::contiguous(self.coreset_id, self.coreset_nof_freq_res, self.coreset_duration),
        };
        coreset.validate(&carrier)?;

        let ss_type = match self.search_space_type {
            SsType::Common => SearchSpaceType::Common,
            SsType::Ue => SearchSpaceType::Ue,
        };
        let mut search_space = SearchSpace::with_max_candidates(self.search_space_id, &coreset, ss_type);
        if let Some(candidates) = &self.nof_candidates {
            if candidates.len() != NOF_AGGREGATION_LEVELS {
                bail!(
                    "nof_candidates needs {} entries, got {}",
                    NOF_AGGREGATION_LEVELS,
                    candidates.len()
                );
            }
            for (level, (&requested, max)) in candidates
                .iter()
                .zip(search_space.nof_candidates.iter_mut())
                .enumerate()
            {
                if requested > *max {
                    bail!("{} candidates at level {} exceed the CORESET maximum {}", requested, level, max);
                }
                *max = requested;
            }
        }

        Ok(CcConfig { carrier, coreset, search_space })
    }
}

/// UE and scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UesConfig {
    /// C-RNTIs scheduled round robin and blind-searched
    #[serde(default = "default_rntis")]
    pub rntis: Vec<u16>,
    #[serde(default = "default_mcs")]
    pub mcs: u32,
    /// PRB per grant
    #[serde(default = "default_grant_prb")]
    pub nof_prb: u32,
    /// Aggregation level index of the scheduling DCI
    #[serde(default = "default_aggregation_level")]
    pub aggregation_level: u32,
    /// Schedule every `period` subframes
    #[serde(default = "default_period")]
    pub period: u32,
    /// Row of the default PDSCH time-domain table
    #[serde(default)]
    pub time_alloc_row: u32,
}

fn default_rntis() -> Vec<u16> {
    vec![0x4601]
}

fn default_mcs() -> u32 {
    9
}

fn default_grant_prb() -> u32 {
    10
}

fn default_aggregation_level() -> u32 {
    1
}

fn default_period() -> u32 {
    1
}

impl Default for UesConfig {
    fn default() -> Self {
        Self {
            rntis: default_rntis(),
            mcs: default_mcs(),
            nof_prb: default_grant_prb(),
            aggregation_level: default_aggregation_level(),
            period: default_period(),
            time_alloc_row: 0,
        }
    }
}

/// Subframe processing options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhySection {
    /// Feed every transmitted subframe back into the receive path
    #[serde(default = "default_loopback")]
    pub loopback: bool,
    #[serde(default)]
    pub measure_evm: bool,
    #[serde(default)]
    pub measure_time: bool,
    /// Magnitude of loopback LLRs
    #[serde(default = "default_llr_magnitude")]
    pub llr_magnitude: i8,
}

fn default_loopback() -> bool {
    true
}

fn default_llr_magnitude() -> i8 {
    10
}

impl Default for PhySection {
    fn default() -> Self {
        Self {
            loopback: default_loopback(),
            measure_evm: false,
            measure_time: false,
            llr_magnitude: default_llr_magnitude(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Report statistics every this many subframes, 0 disables
    #[serde(default = "default_stats_period")]
    pub stats_period: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_period() -> u32 {
    1000
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_period: default_stats_period(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: WorkersConfig::default(),
            pdu_queue: PduQueueSection::default(),
            cells: default_cells(),
            ues: UesConfig::default(),
            phy: PhySection::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file {}", path))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Check cross-section constraints the loaders cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.nof_workers == 0 {
            bail!("At least one subframe worker is required");
        }
        if self.cells.is_empty() {
            bail!("At least one cell is required");
        }
        if self.pdu_queue.capacity == 0 {
            bail!("PDU queue capacity must be positive");
        }
        if self.ues.rntis.iter().any(|&rnti| rnti == 0) {
            bail!("RNTI 0 cannot be scheduled");
        }
        Ok(())
    }

    pub fn cc_configs(&self) -> anyhow::Result<Vec<CcConfig>> {
        self.cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| cell.to_cc_config().map_err(|e| anyhow!("cell {}: {}", idx, e)))
            .collect()
    }

    pub fn pdu_queue_config(&self) -> PduQueueConfig {
        let full_policy = match self.pdu_queue.full_policy {
            FullPolicyKind::Block => FullPolicy::Block {
                timeout: Duration::from_millis(self.pdu_queue.push_timeout_ms),
            },
            FullPolicyKind::Drop => FullPolicy::Drop,
        };
        PduQueueConfig {
            capacity: self.pdu_queue.capacity,
            max_pdu_len: self.pdu_queue.max_pdu_len,
            full_policy,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            ues: self.ues.rntis.clone(),
            mcs: self.ues.mcs,
            nof_prb: self.ues.nof_prb,
            aggregation_level: self.ues.aggregation_level,
            period: self.ues.period,
            time_alloc_row: self.ues.time_alloc_row,
        }
    }

    pub fn sf_worker_config(&self) -> SfWorkerConfig {
        SfWorkerConfig {
            loopback: self.phy.loopback,
            monitored_rntis: self.ues.rntis.clone(),
            pdcch: PdcchArgs {
                measure_evm: self.phy.measure_evm,
                measure_time: self.phy.measure_time,
            },
            llr_magnitude: self.phy.llr_magnitude,
        }
    }
}
