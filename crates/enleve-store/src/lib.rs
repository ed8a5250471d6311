//! # enleve-store
//!
//! Local, self-contained implementation of the ENLEVE backend contracts,
//! backed by SQLite and a directory of objects on disk.
//!
//! The hosted backend keeps leads, profiles and the broker queue; this crate
//! mirrors its schema and behavior closely enough to run the CRM offline,
//! seed demo data and drive end-to-end tests. [`Database`] exposes
//! synchronous typed helpers; [`LocalBackend`] wraps it behind the async
//! traits from `enleve_shared::backend`.

pub mod attendances;
pub mod backend;
pub mod changes;
pub mod chat_histories;
pub mod database;
pub mod migrations;
pub mod objects;
pub mod preferences;
pub mod profiles;
pub mod queue;

mod error;

pub use attendances::NewAttendance;
pub use backend::LocalBackend;
pub use database::Database;
pub use error::StoreError;
pub use objects::ObjectStore;
