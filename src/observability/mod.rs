//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty, compact or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through logs and is forwarded upstream
//! - Metrics are cheap (no-ops until an exporter is installed)
//! - Token secrets never reach either sink

pub mod logging;
pub mod metrics;
