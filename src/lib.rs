pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod translate;
pub mod transport;
pub mod utils;

pub use client::StorageClient;
pub use config::BridgeConfig;
pub use credentials::{Credential, CredentialCache, TokenSupplier};
pub use error::{AuthError, ConfigError, Error, TransportError};
pub use pipeline::Pipeline;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
