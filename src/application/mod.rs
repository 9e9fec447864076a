pub mod cli;
pub mod reports;
pub mod server;
pub mod ui;
