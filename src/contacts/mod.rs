//! Contact synchronization against the random-user service.

pub mod client;
pub mod engine;
pub mod normalize;
pub mod parser;
pub mod types;

pub use client::{HttpTransport, Transport};
pub use engine::ContactSyncEngine;
pub use types::ContactRecord;
