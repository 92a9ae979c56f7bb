pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod store;

pub use sqlx;

pub use db::{init_db, open_store};
pub use error::{LedgerError, Result};
pub use repositories::PgStore;
pub use store::{AccountStore, CodeStore, GenerationStore, LedgerStore, MemoryStore};
