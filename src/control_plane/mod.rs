pub mod client;
pub mod error;
pub mod types;

pub use client::ControlPlaneClient;
pub use error::ControlPlaneError;
pub use types::{JobManifest, ManifestEntry};
