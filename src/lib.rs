pub mod classify;
pub mod cli;
pub mod diff;
pub mod edit;
pub mod error;
pub mod ingest;
pub mod model;
pub mod remap;
pub mod tree;
pub mod views;
