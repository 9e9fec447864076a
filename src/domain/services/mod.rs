mod admission_gate;
mod evaluation_engine;
mod export;
mod lab_runner;
mod persistence;
mod rate_limit;
mod scoring;
mod session_controller;
mod stream_decoder;

pub use admission_gate::*;
pub use evaluation_engine::*;
pub use export::*;
pub use lab_runner::*;
pub use persistence::*;
pub use rate_limit::*;
pub use scoring::*;
pub use session_controller::*;
pub use stream_decoder::*;
