mod classify;
mod filename;
mod transfer;

pub use classify::{Completeness, DEFAULT_TOLERANCE, classify_episode};
pub use filename::episode_filename;
pub use transfer::{TransferOutcome, TransferPolicy, transfer_episode};
