// Core library for the Cachet caching middleware
// This crate is the seam to the host framework: request/response types,
// the middleware contract, errors and logging setup.

pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;

// Re-export commonly used types
pub use error::*;
pub use http::*;
pub use middleware::*;
