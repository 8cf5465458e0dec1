// Public contracts for the Mimir API
// This crate defines the DTOs and enums shared by the server and clients

pub mod alert;
pub mod common;
pub mod import;
pub mod monitoring;
pub mod scheduler;
pub mod workflow;

pub use alert::*;
pub use common::*;
pub use import::*;
pub use monitoring::*;
pub use scheduler::*;
pub use workflow::*;
