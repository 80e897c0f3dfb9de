//! Portable, exact implementation of bidirectional self-attention.
//!
//! This path favours clarity over absolute performance.

pub mod exact;

pub use exact::ExactAttention;
