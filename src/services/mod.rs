pub mod api;
pub mod channel;
pub mod fallback;
pub mod poll;
pub mod push;
pub mod session;
pub mod store;
pub mod timeout;
