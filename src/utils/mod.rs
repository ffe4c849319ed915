// Shared helpers with no knowledge of Go or aspects.

/// Content hashing (blake3)
pub mod hashing;

/// Output and display paths
pub mod paths;
