//! API middleware

mod logging;

pub use logging::RequestLogging;
