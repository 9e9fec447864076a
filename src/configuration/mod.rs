mod config;
mod env;

pub use config::*;
pub use env::*;
