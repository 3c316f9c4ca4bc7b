//! RSvn Working Copy Library
//!
//! Local working-copy metadata engine:
//! - Per-directory administrative areas (entries, property stores, text bases)
//! - Positional entries codec (format 8) and the legacy XML reader (format 4)
//! - Crash-safe journaled operations with replay and renumbering recovery
//! - Format detection, gating, and in-place upgrade
//! - Multi-directory access management with write locking
//! - EOL/keyword translation and timestamp-based modification detection

pub mod access;
pub mod area;
pub mod entries;
pub mod error;
pub mod factory;
pub mod fsutil;
pub mod log;
pub mod props;
pub mod runner;
pub mod timeutil;
pub mod translate;
pub mod xml;

pub use access::WcAccess;
pub use area::{AdminArea, Canceller, ADMIN_DIR_NAME, KILLME};
pub use entries::{
    Entry, EntryField, EntryPatch, EntryTable, NodeKind, Schedule, INVALID_REVISION, THIS_DIR,
    WC_FORMAT,
};
pub use error::{Result, WcError};
pub use factory::{check_wc, ensure_versioned_directory, open, open_current, upgrade, OpenedArea};
pub use log::{Log, LogCommand, WORKING_TIMESTAMP};
pub use props::{svn_props, PropertyDiff, PropertyMap, VersionedProperties};
pub use runner::LogRunner;
pub use translate::{KeywordMap, TranslateOptions};
pub use xml::{XmlArea, XML_FORMAT};
