pub mod jwt_auth;
pub mod key_auth;
