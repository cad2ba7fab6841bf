mod host;
mod outcome;

pub use host::*;
pub use outcome::*;
