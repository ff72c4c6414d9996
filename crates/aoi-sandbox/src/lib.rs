//! Sandbox session pool for the aoi integration gateway.
//!
//! Maintains a fixed-size set of remote code-execution sessions with
//! stacking allocation, creation retries, health checking and idle
//! scale-down, on top of an abstract control-plane seam.

pub mod control;
pub mod errors;
pub mod http;
pub mod pool;
pub mod types;

#[allow(unused_imports)]
pub use control::*;
#[allow(unused_imports)]
pub use errors::*;
#[allow(unused_imports)]
pub use http::*;
#[allow(unused_imports)]
pub use pool::*;
#[allow(unused_imports)]
pub use types::*;
