//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, request ID)
//!     → [routing decides Rewrite / PassThrough / Login]
//!     → upstream.rs (outbound header policy, forward to backend)
//!     → rewrite::interceptor or login.rs (shape the response)
//!     → response.rs (error mapping, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod login;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use request::{ProxyRequestId, X_REQUEST_ID};
pub use response::ProxyError;
pub use server::{HttpServer, StartupError};
pub use upstream::UpstreamClient;
