//! Compose and transfer engines plus the queue consumer for the depot
//! upload service.
//!
//! The compose engine turns N ordered staged chunks into one final object
//! while computing its digest; the transfer engine moves single pre-staged
//! objects into place; the consumer loop (in `main.rs`) drives both from
//! broker deliveries.

pub mod compose;
pub mod error;
pub mod handler;
pub mod transfer;

pub use compose::{ComposeEngine, ComposeOutcome, INTERIM_PREFIX};
pub use error::{ComposeError, ComposeResult};
pub use handler::{ChunkCompleteHandler, TransferHandler, completion_for};
pub use transfer::{TransferEngine, TransferOutcome};
