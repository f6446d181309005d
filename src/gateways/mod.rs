//! Gateway implementations.
//!
//! This module provides concrete [`Gateway`](crate::Gateway) implementations
//! behind feature gates:
//!
//! | Feature        | Gateway       |
//! |----------------|---------------|
//! | `gateway-http` | [`HttpGateway`] |

#[cfg(feature = "gateway-http")]
pub mod http;

#[cfg(feature = "gateway-http")]
pub use http::HttpGateway;
