//! Process plumbing shared by the reaper crates: logging setup and version
//! information.

pub mod logging;
pub mod version;
