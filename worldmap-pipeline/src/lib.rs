//! Chunk pipeline: records, delivery and scheduling.
//!
//! ```text
//! ChunkSource --run_pass--> Coordinator --RecordBuilder--> ChunkRecord
//!                               |                              |
//!                             Ledger <----- Delivered ---- DeliveryClient
//! ```

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod pass;
pub mod record;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use coordinator::{ChunkOutcome, Coordinator, Submission};
pub use delivery::{Delivery, DeliveryClient, HttpTransport, Transport, TransportError};
pub use pass::{PassSummary, run_pass};
pub use record::{ChunkRecord, ExtractionError, RecordBuilder, TextureInfo};
