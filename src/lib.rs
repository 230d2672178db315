pub mod audit;
pub mod budget;
pub mod config;
pub mod delegate;
pub mod errors;
pub mod gates;
pub mod init;
pub mod knowledge;
pub mod model;
pub mod orchestrator;
pub mod phase;
pub mod registry;
pub mod rollback;
pub mod util;
