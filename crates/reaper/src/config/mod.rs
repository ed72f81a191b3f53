pub mod cli;
pub mod reaper_config;

pub use cli::*;
pub use reaper_config::*;
