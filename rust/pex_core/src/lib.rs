//! `pex_core`: context-aware permission engine.
//!
//! Stores per-subject permissions, options, parents and default values
//! scoped by context sets, and resolves them through inheritance into
//! cached, immutable results that are invalidated whenever any contributing
//! subject changes.
//!
//! Modules:
//! - `types`: contexts, subject references, tri-state results
//! - `tree`: permission node tree (most specific node wins)
//! - `data`: immutable `SubjectData`, listeners, raw data cache, store seam
//! - `bake`: inheritance resolution into `BakedSubjectData`
//! - `subject`: live subjects with their baked-data LRU
//! - `collection`: subjects of one type
//! - `service`: `PermissionService`, context calculators, subject directory
//! - `conversion`: legacy node syntax and data transfer helpers
//! - `config`: `PexConfig`
//! - `error`: `PexError`

pub mod bake;
pub mod collection;
pub mod config;
pub mod conversion;
pub mod data;
pub mod error;
pub mod service;
pub mod subject;
pub mod tree;
pub mod types;

pub use bake::{BakedSubjectData, SubjectDirectory};
pub use collection::SubjectCollection;
pub use config::{parse_config, PexConfig};
pub use data::store::{MemoryStore, SubjectDataStore};
pub use data::{DataEntry, SubjectData};
pub use error::{PexError, Result};
pub use service::{ContextCalculator, PermissionService};
pub use subject::{Subject, SubjectDataHandle};
pub use types::{Context, ContextSet, SubjectRef, Tristate};
