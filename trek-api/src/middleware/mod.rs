pub mod auth;

pub use auth::{optional_auth_middleware, require_auth_middleware, Claims};
