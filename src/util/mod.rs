//! Shared plumbing

pub mod retry;

pub use retry::{RetryPolicy, Retryable};
