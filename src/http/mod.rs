//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, concurrency limit)
//!     → request.rs (request ID, method policy)
//!     → forward.rs (token, URL/header rewrite, streaming upstream call)
//!     → relay.rs (status, filtered headers, streaming body)
//!     → Send to client
//! ```

pub mod forward;
pub mod relay;
pub mod request;
pub mod server;

pub use forward::{Forwarder, Upstream};
pub use relay::relay;
pub use request::{MethodPolicy, X_REQUEST_ID};
pub use server::HttpServer;
