pub mod fetch;
pub mod session;
