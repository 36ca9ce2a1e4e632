pub mod logging;
pub mod pipeline;

pub use logging::*;
pub use pipeline::*;
