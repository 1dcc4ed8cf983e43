pub mod cli;
pub mod combine;
pub mod config;
pub mod dataset;
pub mod duplicate;
pub mod engine;
pub mod error;
pub mod gate;
pub mod job;
pub mod labels;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod util;
