//! Mirroring reverse proxy.
//!
//! Serves a site hosted at one origin from another host by rewriting every
//! reference to the backend origin in bodies, redirects and cookies.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    MIRROR PROXY                       │
//!                     │                                                       │
//!   Client Request    │  ┌─────────┐    ┌──────────┐    ┌──────────────┐      │
//!   ──────────────────┼─▶│  http   │───▶│ routing  │───▶│   upstream   │──────┼──▶ Backend
//!                     │  │ server  │    │  table   │    │    client    │      │    Origin
//!                     │  └─────────┘    └──────────┘    └──────┬───────┘      │
//!                     │                                        │              │
//!                     │                                        ▼              │
//!   Client Response   │  ┌─────────┐    ┌──────────────────────────────┐      │
//!   ◀─────────────────┼──│response │◀───│ rewrite: interceptor, codec, │◀─────┼─── Response
//!                     │  │ / login │    │   url engine, headers        │      │
//!                     │  └─────────┘    └──────────────────────────────┘      │
//!                     │                                                       │
//!                     │  ┌─────────┐  ┌──────────────┐  ┌──────────────┐      │
//!                     │  │ config  │  │observability │  │  lifecycle   │      │
//!                     │  └─────────┘  └──────────────┘  └──────────────┘      │
//!                     └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod rewrite;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
