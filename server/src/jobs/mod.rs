pub mod job_types;
pub mod registry;

// Re-export the job types and registry for easier access
pub use job_types::*;
pub use registry::*;
