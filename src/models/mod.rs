pub mod job;
pub mod session;
pub mod update;
