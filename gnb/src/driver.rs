//! Subframe driver
//!
//! Owns the worker pool, the PDU queue and its consumer thread, and paces
//! subframes through the pool: reserve a worker for the TTI, configure it,
//! start it. A worker that cannot be reserved before the subframe deadline
//! costs that subframe.

use crate::config::EngineConfig;
use anyhow::{Context, Result};
use common::threads::{self, ThreadParams};
use common::{background_workers, WorkerPool};
use layers::mac::{MacPduHandler, MacRxStats, MacScheduler, PduQueue};
use layers::phy::{PhyCommon, PhyStatsSnapshot, SfWorker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// TTIs wrap at 10240 subframes like the hyper frame counter
const TTI_WRAP: u32 = 10240;

/// Poll period of the PDU consumer thread
const CONSUMER_POLL: Duration = Duration::from_millis(10);

/// Driver counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub subframes: u64,
    pub deadline_misses: u64,
    pub phy: PhyStatsSnapshot,
    pub mac: MacRxStats,
}

/// Running engine
pub struct Engine {
    pool: WorkerPool<SfWorker>,
    phy: Arc<PhyCommon>,
    pdu_queue: Arc<PduQueue>,
    mac: Arc<MacPduHandler>,
    consumer: Option<JoinHandle<()>>,
    consumer_running: Arc<AtomicBool>,
    tti_duration: Duration,
    stats_period: u32,
    subframes: u64,
    deadline_misses: u64,
}

impl Engine {
    /// Build every component and start the worker and consumer threads
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let cc_configs = config.cc_configs()?;
        let carriers: Vec<_> = cc_configs.iter().map(|cc| cc.carrier).collect();

        let pdu_queue = Arc::new(PduQueue::new(config.pdu_queue_config())?);
        let mac = Arc::new(MacPduHandler::new());
        pdu_queue.init(mac.clone());

        let scheduler = MacScheduler::new(config.scheduler_config(), &carriers)?;
        let phy = Arc::new(PhyCommon::new(scheduler, pdu_queue.clone()));

        let nof_workers = config.workers.nof_workers;
        let pool = WorkerPool::new(nof_workers);
        for id in 0..nof_workers {
            let mut worker = SfWorker::new(id, phy.clone(), config.sf_worker_config());
            for (cc_idx, cc) in cc_configs.iter().enumerate() {
                worker
                    .set_carrier(cc_idx as u32, cc.clone())
                    .with_context(|| format!("worker {} carrier {}", id, cc_idx))?;
            }
            pool.init_worker(id, worker, config.workers.priority, config.workers.affinity_mask)?;
        }

        if !common::init_background_workers(config.workers.background_workers) {
            debug!("Background workers already running");
        }

        let consumer_running = Arc::new(AtomicBool::new(true));
        let consumer = {
            let queue = pdu_queue.clone();
            let running = consumer_running.clone();
            threads::spawn(ThreadParams::new("MAC-PDU"), move || {
                while running.load(Ordering::Acquire) {
                    queue.process_pdus_timeout(CONSUMER_POLL);
                }
            })?
        };

        // Slot duration of the primary carrier paces the whole engine
        let tti_duration = carriers.first().copied().unwrap_or_default().slot_duration();

        info!(
            "Engine ready: {} workers, {} carriers, {} PDU buffers, TTI {} us",
            nof_workers,
            carriers.len(),
            pdu_queue.capacity(),
            tti_duration.as_micros()
        );

        Ok(Self {
            pool,
            phy,
            pdu_queue,
            mac,
            consumer: Some(consumer),
            consumer_running,
            tti_duration,
            stats_period: config.log.stats_period,
            subframes: 0,
            deadline_misses: 0,
        })
    }

    /// Run up to `nof_subframes` subframes, or until `stop` is raised
    ///
    /// With `realtime` each subframe starts on its own TTI boundary and a
    /// worker must be free before that boundary ends; otherwise subframes
    /// run back to back and the driver waits for a free worker.
    pub fn run(&mut self, nof_subframes: Option<u64>, realtime: bool, stop: &AtomicBool) {
        let mut tti_start = Instant::now();
        let mut sf: u64 = 0;

        while nof_subframes.map_or(true, |n| sf < n) && !stop.load(Ordering::Relaxed) {
            let tti = (sf % TTI_WRAP as u64) as u32;

            let reserved = if realtime {
                if let Some(wait) = tti_start.checked_duration_since(Instant::now()) {
                    std::thread::sleep(wait);
                }
                let deadline = tti_start + self.tti_duration;
                tti_start = deadline;
                self.pool.wait_worker_until(tti, deadline)
            } else {
                self.pool.wait_worker(tti)
            };

            match reserved {
                Some(mut worker) => {
                    worker.set_tti(tti);
                    self.pool.start_worker(worker);
                    self.subframes += 1;
                }
                None if stop.load(Ordering::Relaxed) => break,
                None => {
                    self.deadline_misses += 1;
                    warn!("No worker free for TTI {}, subframe skipped", tti);
                }
            }

            sf += 1;
            if self.stats_period > 0 && sf % self.stats_period as u64 == 0 {
                self.report();
            }
        }
    }

    /// Hand a statistics snapshot to the background pool for logging
    fn report(&self) {
        let phy = self.phy.stats.snapshot();
        let mac = self.mac.clone();
        let pending = self.pdu_queue.nof_pending();
        let (subframes, misses) = (self.subframes, self.deadline_misses);
        background_workers().push_task(move || {
            let rx = mac.stats();
            info!(
                "sf={} missed={} dci tx/rx={}/{} crc ok/ko={}/{} pdus={} dropped={} pending={}",
                subframes, misses, phy.dci_tx, phy.dci_rx, phy.pdsch_crc_ok, phy.pdsch_crc_ko,
                rx.pdus, phy.pdus_dropped, pending
            );
        });
    }

    /// Wait for in-flight subframes, drain the PDU queue and stop every thread
    pub fn shutdown(&mut self) -> DriverStats {
        // Reserving each slot waits for its current unit of work
        for id in 0..self.pool.nof_workers() {
            drop(self.pool.wait_worker_id(id));
        }
        self.pool.stop();

        self.consumer_running.store(false, Ordering::Release);
        if let Some(handle) = self.consumer.take() {
            if handle.join().is_err() {
                warn!("PDU consumer thread panicked");
            }
        }
        while self.pdu_queue.process_pdus() {}

        self.stats()
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            subframes: self.subframes,
            deadline_misses: self.deadline_misses,
            phy: self.phy.stats.snapshot(),
            mac: self.mac.stats(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            self.shutdown();
        }
    }
}
