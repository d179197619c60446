pub mod api;
pub mod cli;
pub mod engine;
pub mod error;
pub mod storage;
pub mod tasks;
