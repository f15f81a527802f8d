pub mod clock;
pub mod message;
pub mod peers;
pub mod processor;
pub mod state;

pub use clock::*;
pub use message::*;
pub use peers::*;
pub use processor::*;
pub use state::*;
