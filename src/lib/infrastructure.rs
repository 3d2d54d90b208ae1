//! Infrastructure module
//!
//! Concrete providers, the job queue, configuration and template rendering.

pub mod config;
pub mod email;
pub mod queue;
pub mod registry;
pub mod templates;

pub use registry::TransportRegistry;
