mod interface;
mod standard;
mod state;
mod status;

pub use interface::*;
pub use standard::*;
pub use status::*;
