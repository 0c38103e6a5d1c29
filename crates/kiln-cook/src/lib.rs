//! Cook state persistence and staleness tracking.
//!
//! This crate decides which cooked outputs must be rebuilt:
//! - compiled-in cooker and per-type data versions ([`CookVersions`])
//! - bulk invalidation of one-to-one types ([`VersionGate`])
//! - per-output dependency documents ([`CookMetadata`]) and the reverse dependency graph built
//!   from them ([`DependencyDatabase`])
//! - wiring of both trees, their caches and watchers ([`CookEnvironment`])
//!
//! ## On-disk layout (inventory)
//!
//! Everything lives in the cooked tree:
//! - `version_data.dat`:
//!   - [`VersionTable`], one `(data, cooker)` pair per [`kiln_core::FileType`]
//! - `<output>.<cooked ext>.json` next to each many-to-one output:
//!   - [`CookMetadata`] as JSON

mod database;
mod environment;
mod error;
mod metadata;
mod util;
mod version_gate;
mod versions;

pub use database::{DependencyDatabase, UpToDateReport};
pub use environment::{CookEnvironment, CookOptions, WatcherFactory};
pub use error::{CookError, Result};
pub use metadata::{CookMetadata, CookSource, CookSourceKind, DirectorySource, SourceStamp};
pub use util::atomic_write;
pub use version_gate::{
    VersionGate, VersionGateOutcome, VersionPair, VersionTable, VERSION_TABLE_FILE,
};
pub use versions::{is_one_to_one, CookVersions, COOKER_VERSION, DATA_VERSIONS};
