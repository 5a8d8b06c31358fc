pub mod config;
pub mod error;
pub mod panic;
pub mod platform;
pub mod relay;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
