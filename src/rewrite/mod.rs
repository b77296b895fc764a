//! Response rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! Backend response (status, headers, body stream)
//!     → interceptor.rs (classify, buffer, drive the pass)
//!     → codec.rs (decode per Content-Encoding)
//!     → url.rs (backend origin → proxy origin, per RewriteContext)
//!     → headers.rs (Location, Set-Cookie)
//!     → codec.rs (re-encode with the original coding)
//!     → interceptor.rs (emit with recomputed Content-Length)
//! ```
//!
//! # Design Decisions
//! - The backend origin is configuration passed in at construction, never global
//! - Every component is immutable after startup and shared via `Arc`
//! - Per-request data lives in `RewriteContext`

pub mod codec;
pub mod context;
pub mod headers;
pub mod interceptor;
pub mod url;

pub use codec::{CodecError, Encoding};
pub use context::{BackendOrigin, OriginError, ProxyScheme, RewriteContext};
pub use headers::{CookieAttributes, HeaderRewriter};
pub use interceptor::{Disposition, InterceptedResponse, ResponseInterceptor, RewriteOutcome};
pub use url::UrlRewriter;
