pub mod message;
pub mod stock;
pub mod event;
pub mod config;
pub mod error;


pub use error::StockError;

pub type Result<T> = std::result::Result<T, StockError>;
