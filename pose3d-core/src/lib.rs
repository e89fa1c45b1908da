pub mod config;
pub mod dataset;
pub mod detection;
pub mod export;
pub mod geometry;
pub mod patch;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod root;
pub mod runtime;
pub mod skeleton;
pub mod video;

// Re-export the error type so callers only need `pose3d_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
