//! rusty-forum/crates/rf-api/src/middleware.rs Middleware
//!
//! Request logging, CORS and default response headers.

use actix_cors::Cors;
use actix_web::middleware::{DefaultHeaders, Logger};

/// Logs one line per request:
/// remote-ip "request-line" status-code response-size time-taken
pub fn standard_middleware() -> Logger {
    Logger::new(r#"%a "%r" %s %b %Dms"#)
}

/// Forms only post back to this origin.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allowed_methods(vec!["GET", "POST"])
        .max_age(3600)
}

pub fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"))
        .add(("X-Frame-Options", "DENY"))
}
