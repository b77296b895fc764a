//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, query)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched route (Rewrite / PassThrough / Login) or the default
//!
//! Route Compilation (at startup):
//!     LoginConfig + RouteConfig[]
//!     → Sort by priority, login first
//!     → Compile matchers
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use router::{Dispatch, MatchedRoute, Router};
