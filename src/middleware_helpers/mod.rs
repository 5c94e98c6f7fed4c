pub mod admin_key;
pub mod request_id;

pub use admin_key::{admin_key_middleware, ADMIN_KEY_HEADER};
pub use request_id::request_id_middleware;
