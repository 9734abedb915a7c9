pub mod config;
pub mod error;
pub mod outcome;
pub mod work;

pub use config::ArbiterConfig;
pub use error::*;
pub use outcome::*;
pub use work::*;
