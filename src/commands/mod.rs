pub mod download;
pub mod login;
pub mod metadata;
pub mod purchase;
pub mod search;
pub mod versions;
pub mod whoami;

use anyhow::Result;
use ipagrab::{AppIdentity, AppStore, Config};

/// Build the store client from config; shared by every command.
pub(crate) fn open_store() -> Result<AppStore> {
    let config = Config::load()?;
    Ok(AppStore::new(config)?)
}

/// Turn the common `--app-id` / `--bundle-id` flag pair into an identity.
pub(crate) fn identity_from(app_id: Option<u64>, bundle_id: Option<String>) -> Result<AppIdentity> {
    if app_id.is_none() && bundle_id.is_none() {
        anyhow::bail!("specify an app with --app-id or --bundle-id");
    }
    Ok(AppIdentity::new(app_id, bundle_id)?)
}
