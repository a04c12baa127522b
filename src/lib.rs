//! ROM Librarian Core
//!
//! The engine behind a desktop utility for organizing retro-game ROM
//! collections. This library provides content-addressed duplicate detection,
//! DAT-based renaming, collision-safe bulk rename planning with undo,
//! collection comparison, multi-disc playlist building, and ZIP
//! compression/extraction. A GUI shell drives these operations through plain
//! async function calls and renders the returned outcome structs; no UI code
//! lives here.

pub mod archive;
pub mod cache;
pub mod compare;
pub mod config;
pub mod convert;
pub mod dat;
pub mod dedup;
pub mod error;
pub mod gamelist;
pub mod hashing;
pub mod m3u;
pub mod models;
pub mod progress;
pub mod rename;
pub mod scanner;
pub mod update;

pub use cache::{CacheKey, HashCache};
pub use compare::{CompareMethod, CompareOutcome, Comparator};
pub use dat::DatIndex;
pub use dedup::{DuplicateScanner, KeepStrategy};
pub use error::{Error, Result};
pub use hashing::{HashAlgorithm, HashDigest};
pub use models::*;
pub use progress::{CancelFlag, ProgressTracker};
pub use rename::{CollisionStrategy, RenamePlanner};
pub use scanner::{FilterMode, ScanOutcome, ScanScope, Scanner};

/// Application version, reported to the update checker.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
