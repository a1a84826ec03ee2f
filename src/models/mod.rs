pub mod endpoint;
pub mod probe;

pub use endpoint::*;
pub use probe::*;
