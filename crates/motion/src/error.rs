//! Error types for the motion planning crate.

/// Represents errors that can occur during motion planning.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlannerError {
    /// The block ring is full and cannot accept new moves. The caller is
    /// expected to service its idle routine and retry.
    BufferFull,
}
