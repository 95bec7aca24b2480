//! Shared types for tournbuddy.
//!
//! This crate contains the values every other tournbuddy crate passes
//! around: endpoints, the pre-shared authorization code, application
//! messages, and the service constants used for advertisement and local
//! socket naming.

pub mod auth;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod service;

pub use auth::AuthorizationCode;
pub use endpoint::{Advertisement, Endpoint, EndpointKind};
pub use error::TypesError;
pub use message::{Message, DELIMITER};
pub use service::{DEFAULT_PORT, SERVICE_DOMAIN, SERVICE_TYPE};
