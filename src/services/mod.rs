// src/services/mod.rs
//
// Clients for external services used by the domain modules

pub mod google;

// Re-export commonly used types for convenience
pub use google::{GoogleService, IdentityProvider, ProviderError, ProviderProfile};
