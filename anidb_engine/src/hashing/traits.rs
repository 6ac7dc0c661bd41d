//! Streaming hasher abstraction

/// Trait for streaming hash calculation
///
/// Implementations must accept arbitrarily sized `update` slices and produce
/// the same digest regardless of how the input was split.
pub trait StreamingHasher: Send {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize the hash calculation and return the lowercase hex digest
    fn finalize(self: Box<Self>) -> String;
}
