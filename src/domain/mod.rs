pub mod accounts;
pub mod entitlement;
pub mod error;
pub mod favorites;
pub mod history;
pub mod ledger;
pub mod model;
pub mod payment;
pub mod purchase;
