pub mod compression;
pub mod logging;
pub mod metrics;
pub mod request_logger;

pub use compression::*;
pub use logging::*;
pub use metrics::*;
pub use request_logger::*;
