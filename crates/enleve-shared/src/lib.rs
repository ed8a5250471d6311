//! # enleve-shared
//!
//! Domain model and contracts shared by the ENLEVE CRM crates: attendance
//! (lead) records and their lifecycle, broker profiles, input validation,
//! the invitation contract and the traits every backend implements.

pub mod backend;
pub mod constants;
pub mod error;
pub mod invite;
pub mod lifecycle;
pub mod models;
pub mod types;
pub mod validation;

pub use error::{BackendError, TransitionError, ValidationError};
