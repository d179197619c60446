pub mod executor;
pub mod status;
pub mod types;

pub use executor::WorkflowEngine;
pub use status::StatusService;
