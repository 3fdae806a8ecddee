pub mod cookie;
pub mod delegation;
pub mod health;
pub mod json;
pub mod session;
