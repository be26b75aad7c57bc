pub mod cli;
pub mod data;
pub mod dataset;
pub mod export;
pub mod metrics;
pub mod model;
pub mod training;
