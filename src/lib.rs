pub mod cli;
pub mod datasets;
pub mod models;
pub mod nn;
pub mod utils;
