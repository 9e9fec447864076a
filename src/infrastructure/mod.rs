pub mod providers;
pub mod transport;
