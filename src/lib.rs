pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod generation;
pub mod hasher;
pub mod logging;
pub mod memory;
pub mod modes;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod windower;
