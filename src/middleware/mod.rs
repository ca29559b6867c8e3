// ABOUTME: HTTP middleware for request correlation, CORS, and rate limiting
// ABOUTME: Request ID generation and propagation into tracing spans

/// CORS configuration
pub mod cors;
/// Per-IP rate limiting of credential-bearing endpoints
pub mod rate_limiting;
/// Request ID middleware
pub mod request_id;

pub use cors::setup_cors;
pub use rate_limiting::{create_rate_limit_error, create_rate_limit_headers, headers, rate_limit};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
