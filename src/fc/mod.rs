//! Inline tool-call extraction from streamed text.

pub mod extractor;
pub mod registry;

pub use extractor::ToolCallExtractor;
pub use registry::{ToolRegistry, ToolSpec};
