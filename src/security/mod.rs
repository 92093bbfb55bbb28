//! Security envelope: IP allow/block, rate limiting, audit logging, and
//! security response headers. Each concern is its own submodule; `web::mod`
//! wires them into the middleware chain in the order spec'd: ip-check,
//! then rate-check, then the handler, then audit-write on the way out.

pub mod audit;
pub mod headers;
pub mod ip;
pub mod rate_limit;

pub use audit::{AuditLog, AuditRecord};
pub use headers::security_headers_middleware;
pub use ip::IpPolicy;
pub use rate_limit::RateLimiter;
