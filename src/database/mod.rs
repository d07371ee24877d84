pub mod postgres_repository;
pub mod profile;
pub mod session;
pub mod user;
