//! Distributed, multi-threaded wavelet tree construction.
//!
//! Each worker builds the node bit vectors of its shard by prefix counting,
//! then a merge over message passing turns them into level bit vectors of
//! which every worker owns one contiguous range.

pub mod alphabet;
pub mod bits;
pub mod bitvec;
pub mod comm;
pub mod config;
pub mod construct;
pub mod error;
pub mod histogram;
pub mod local;
pub mod memory;
pub mod merge;
pub mod partition;
pub mod persist;
pub mod pipeline;
pub mod rank;
pub mod stats;
pub mod symbol;
pub mod tree;
pub mod validate;

pub use alphabet::EffectiveAlphabet;
pub use bitvec::BitVector;
pub use comm::{Communicator, Tag};
pub use config::Config;
pub use error::{Error, Result};
pub use histogram::Histogram;
pub use local::{LocalCluster, LocalComm};
pub use merge::LevelBits;
pub use rank::RankIndex;
pub use stats::RunStats;
pub use symbol::SymbolWidth;

/// Returns whether `f` panics, without printing the panic message.
/// Only call it from closures whose captured state is not observed after
/// a panic.
#[cfg(test)]
pub(crate) fn panics<F: FnOnce() -> R, R>(f: F) -> bool {
    // Register a do-nothing panic hook to prevent intended panics from printing stack traces.
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    std::panic::set_hook(prev_hook);
    result.is_err()
}
