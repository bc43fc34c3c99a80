// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod delivery;
pub mod job;
pub mod processor;
pub mod store;
pub mod transport;

// Application layer
pub mod service;
