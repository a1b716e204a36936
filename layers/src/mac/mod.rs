//! Medium Access Control (MAC) Layer Implementation
//! 
//! Downlink scheduling and the PDU delivery path from the PHY workers
//! (3GPP TS 38.321).

pub mod pdu_handler;
pub mod pdu_queue;
pub mod scheduler;

pub use pdu_handler::{MacPduHandler, MacRxStats};
pub use pdu_queue::{Channel, FullPolicy, PduBuffer, PduCallback, PduQueue, PduQueueConfig};
pub use scheduler::{DlGrant, MacScheduler, SchedulerConfig, SlotSchedule};
