pub mod config;
pub mod error;
pub mod policy;

pub use config::Config;
pub use error::*;
pub use policy::{Policy, RoutingHints};
