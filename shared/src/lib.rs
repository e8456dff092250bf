pub mod error;
pub mod hash;
pub mod types;

pub use error::SharedError;
pub use hash::Hash256;

pub type Result<T> = std::result::Result<T, SharedError>;
