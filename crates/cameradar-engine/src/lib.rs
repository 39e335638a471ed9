pub mod command;
pub mod mock;

pub use command::CommandEngine;
pub use mock::{MockEngine, MockReply};
