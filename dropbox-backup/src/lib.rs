pub mod config;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod sync;
pub mod token_manager;
