pub mod router;
pub mod types;
pub mod handlers {
    pub mod accounts;
    pub mod common;
    pub mod favorites;
    pub mod health;
    pub mod payments;
    pub mod purchases;
}

pub use router::{create_router, ApiDoc};
pub use types::AppState;
