pub mod config;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod game_log;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod reconstruct;
pub mod regression;
pub mod report;
pub mod standardize;
