pub mod agent;
pub mod coordinator;
pub mod tooling;
