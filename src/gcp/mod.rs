pub mod auth;

pub mod gce;

pub mod types;

// Re-export common auth
pub use auth::get_access_token;
