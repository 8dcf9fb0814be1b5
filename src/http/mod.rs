//! HTTP side of the rebinding server.
//!
//! Listeners speak HTTP/1.1 directly on the accepted socket: the
//! multi-A path must write raw non-HTTP bytes mid-request and
//! `/delaydomload` under-delivers its declared length, so the handlers
//! own the connection outright. One transaction per connection; replies
//! always close the socket, which keeps browsers re-resolving.

pub mod request;
pub mod response;
pub mod router;
pub mod servers;

pub use router::Router;
pub use servers::{ServerError, ServerStore};
