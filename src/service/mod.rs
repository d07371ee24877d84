pub mod coordinator;
pub mod identity;
pub mod registry;
