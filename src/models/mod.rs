pub mod health;
pub mod profile;
pub mod role;
pub mod session;
pub mod user;
