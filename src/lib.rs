pub mod app;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::storefront_service::StorefrontService;
pub use domain::error::{LedgerError, LedgerResult};
pub use domain::model::{Account, HistoryEntry, IntentStatus, PaymentIntent, Product};
pub use infra::config::Config;
pub use storage::{Catalog, InMemoryCatalog, MemoryStore, PostgresCatalog, PostgresStore, Store};
