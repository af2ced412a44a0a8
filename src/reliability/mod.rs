//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`CircuitBreakerConfig`] - Circuit breaker configuration
//! - [`breaker::CircuitBreaker`] - the process-local state machine itself

pub mod breaker;
mod circuit_breaker;
mod retry;

pub use breaker::{CallError, CircuitBreaker, CircuitOpenError, CircuitPermit};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
