pub mod ports;
pub mod event_bus;
pub mod codec;
pub mod transcript;
pub mod chat;
pub mod live;
pub mod cache;
pub mod session;
pub mod actions;
pub mod speech;
