//! Storage seam with its PostgreSQL and in-memory backends, row types and outcome signals

pub mod backend;
pub mod error;
pub mod memory;
pub mod repository;
pub mod types;

pub use backend::{BalanceValues, StateBackend};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use repository::PgRepository;
pub use types::*;
