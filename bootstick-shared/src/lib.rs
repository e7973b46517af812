//! bootstick shared types
//!
//! Error taxonomy, constants and the serializable records exchanged between
//! the provisioning core (`bootstick`) and its front ends.

pub mod constants;
pub mod errors;
pub mod manifest;
pub mod progress;

pub use errors::{BootstickError, BootstickResult, DownloadError, ErrorKind};
pub use manifest::{BootEntry, EntryOrigin, Family, LayoutRecord, Manifest};
pub use progress::{ProgressEvent, Stage};
