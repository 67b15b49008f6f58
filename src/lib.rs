//! ipagrab - an App Store client for fetching iOS app packages
//!
//! Implements the store's private protocol: Apple ID authentication with
//! two-factor support, catalog search and version enumeration, free-app
//! license acquisition, and download of signed IPA packages with their DRM
//! license material embedded.
//!
//! The high-level entry point is [`AppStore`]; the CLI in `main.rs` is a thin
//! wrapper over it.
//!
//! # Examples
//!
//! ```no_run
//! use ipagrab::{AppStore, AppIdentity, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = AppStore::new(Config::load()?)?;
//! let results = store.search("notes", 5, false)?;
//! for app in &results.results {
//!     println!("{} ({})", app.name, app.bundle_id);
//! }
//!
//! let identity = AppIdentity::by_bundle_id("com.example.notes");
//! let artifact = store.download(&identity, None, true, None, None)?;
//! println!("saved {}", artifact.path.display());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod cookies;
pub mod download;
pub mod error;
pub mod http;
pub mod keychain;
pub mod purchase;
pub mod session;
pub mod sinf;
pub mod store;

pub use auth::LoginOutcome;
pub use catalog::{App, AppIdentity, SearchResults, VersionList, VersionRecord};
pub use config::Config;
pub use download::{CachedArtifact, CancelToken, DownloadGrant, ProgressCallback};
pub use error::{Error, Result};
pub use purchase::LicenseOutcome;
pub use session::Account;
pub use store::AppStore;
