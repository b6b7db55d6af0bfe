pub mod parser;
pub mod types;
pub mod writer;

pub use types::RespValue;
