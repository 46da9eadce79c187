pub mod messages;
pub mod status;

pub use messages::*;
pub use status::*;
