//! Diff results produced by comparing containers.

/// Flat map diff and its builder.
pub mod map;
/// Record-level diff of nested containers.
pub mod nested;
