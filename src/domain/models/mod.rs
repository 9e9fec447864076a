mod evaluation;
mod event;
mod lab;
mod message;
mod payload;
mod provider;
mod role;
mod settings;
mod transport;

pub use evaluation::*;
pub use event::*;
pub use lab::*;
pub use message::*;
pub use payload::*;
pub use provider::*;
pub use role::*;
pub use settings::*;
pub use transport::*;
