//! # ScreenRTC Signaling
//!
//! Loopback HTTP endpoint that serves the capture page to the capture
//! surface. The page is reachable only under an unguessable path and only
//! when the request names the endpoint as `localhost:<port>`, which keeps
//! other local pages and DNS-rebinding tricks from loading it.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod page;
pub mod server;

pub use page::CAPTURE_PAGE;
pub use server::{EndpointServer, DEFAULT_SHUTDOWN_TIMEOUT};
