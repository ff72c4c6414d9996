//! Request dispatch core for the aoi integration gateway.
//!
//! Forwards abstract execution requests to downstream HTTP targets either
//! synchronously or as a live stream (SSE or chunked), backed by a bounded
//! pool of reusable HTTP clients.

pub mod client_pool;
pub mod dispatch;
pub mod encode;
pub mod errors;
pub mod forward;
pub mod stream;
pub mod types;

#[allow(unused_imports)]
pub use client_pool::*;
#[allow(unused_imports)]
pub use dispatch::*;
#[allow(unused_imports)]
pub use encode::*;
#[allow(unused_imports)]
pub use errors::*;
#[allow(unused_imports)]
pub use forward::*;
#[allow(unused_imports)]
pub use stream::*;
#[allow(unused_imports)]
pub use types::*;
