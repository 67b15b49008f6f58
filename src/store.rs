//! High-level store client
//!
//! `AppStore` wires the session, HTTP client and artifact cache together and
//! exposes the operations the CLI (or an embedding program) actually calls.
//! Every method checks session state up front and maps protocol failures to
//! typed errors, so callers never see raw wire responses.

use crate::auth::{self, LoginOutcome};
use crate::catalog::{
    App, AppIdentity, CatalogClient, SearchResults, VersionList, VersionRecord,
};
use crate::download::{
    self, ArtifactCache, CachedArtifact, CancelToken, DownloadGrant, ProgressCallback,
};
use crate::http::StoreClient;
use crate::purchase::{self, LicenseOutcome};
use crate::session::{Account, Session};
use crate::{Config, Error, Result};
use std::path::PathBuf;

pub struct AppStore {
    config: Config,
    session: Session,
    client: StoreClient,
    cache: ArtifactCache,
}

impl AppStore {
    /// Build a client from configuration, loading any persisted session.
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let session = Session::open(&data_dir)?;
        let client = StoreClient::new(&config, session.cookie_jar().clone())?;
        let cache = ArtifactCache::new(&data_dir);
        Ok(Self {
            config,
            session,
            client,
            cache,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// The signed-in account, or `NotSignedIn`.
    pub fn account(&self) -> Result<Account> {
        self.session.account()
    }

    /// Sign in. See [`crate::auth::login`] for two-factor semantics.
    pub fn login(
        &self,
        email: &str,
        password: &str,
        auth_code: Option<&str>,
    ) -> Result<LoginOutcome> {
        auth::login(
            &self.client,
            &self.session,
            &self.config,
            email,
            password,
            auth_code,
        )
    }

    /// Sign out locally, dropping credentials and cookies.
    pub fn logout(&self) -> Result<()> {
        auth::logout(&self.session)
    }

    pub fn search(&self, term: &str, limit: u32, include_tv_apps: bool) -> Result<SearchResults> {
        self.catalog().search(term, limit, include_tv_apps)
    }

    pub fn lookup(&self, bundle_id: &str) -> Result<App> {
        self.catalog().lookup(bundle_id)
    }

    /// Resolve an app id or bundle id to a catalog entry.
    pub fn resolve_app(&self, identity: &AppIdentity) -> Result<App> {
        self.catalog().resolve(identity)
    }

    /// Acquire a free-app license for the account.
    pub fn acquire_license(&self, identity: &AppIdentity) -> Result<LicenseOutcome> {
        let app = self.resolve_app_with_price(identity)?;
        purchase::acquire_license(&self.client, &self.session, &self.config, &app)
    }

    pub fn list_versions(
        &self,
        identity: &AppIdentity,
        filter_external_version_id: Option<&str>,
    ) -> Result<VersionList> {
        self.catalog()
            .list_versions(identity, filter_external_version_id)
    }

    pub fn version_metadata(
        &self,
        identity: &AppIdentity,
        external_version_id: &str,
    ) -> Result<VersionRecord> {
        self.catalog().version_metadata(identity, external_version_id)
    }

    /// Fetch detail records for many versions concurrently; per-id results.
    pub fn version_metadata_batch(
        &self,
        identity: &AppIdentity,
        external_version_ids: &[String],
    ) -> Result<Vec<(String, Result<VersionRecord>)>> {
        self.catalog()
            .version_metadata_batch(identity, external_version_ids)
    }

    /// Resolve a download grant without fetching the binary.
    pub fn resolve_grant(
        &self,
        identity: &AppIdentity,
        external_version_id: Option<&str>,
    ) -> Result<DownloadGrant> {
        let app = self.resolve_app(identity)?;
        download::resolve_grant(
            &self.client,
            &self.config,
            &self.session,
            app.id,
            external_version_id,
        )
    }

    /// Download an IPA into the cache, returning the finished artifact.
    ///
    /// A cached build is returned without touching the network. With
    /// `purchase_if_needed`, a missing license is acquired once and the grant
    /// retried; without it, the `LicenseRequired` error propagates.
    pub fn download(
        &self,
        identity: &AppIdentity,
        external_version_id: Option<&str>,
        purchase_if_needed: bool,
        progress: Option<&ProgressCallback>,
        cancel: Option<&CancelToken>,
    ) -> Result<CachedArtifact> {
        let account = self.session.account()?;
        let app = self.resolve_app(identity)?;

        // A pinned version can be answered from cache before any grant call.
        // The latest version is only knowable after the grant comes back.
        if let Some(version_id) = external_version_id {
            if let Some(hit) = self.cache.lookup(app.id, version_id) {
                return Ok(hit);
            }
        }

        let grant = match download::resolve_grant(
            &self.client,
            &self.config,
            &self.session,
            app.id,
            external_version_id,
        ) {
            Err(Error::LicenseRequired) if purchase_if_needed => {
                let app = self.resolve_app_with_price(identity)?;
                purchase::acquire_license(&self.client, &self.session, &self.config, &app)?;
                download::resolve_grant(
                    &self.client,
                    &self.config,
                    &self.session,
                    app.id,
                    external_version_id,
                )?
            }
            other => other?,
        };

        if let Some(hit) = self.cache.lookup(app.id, &grant.external_version_id) {
            return Ok(hit);
        }

        download::fetch_and_package(
            &self.client,
            &self.cache,
            &account.email,
            app.id,
            &grant,
            progress,
            cancel,
        )
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir().to_path_buf()
    }

    fn catalog(&self) -> CatalogClient<'_> {
        CatalogClient::new(&self.client, &self.config, &self.session)
    }

    /// Resolve, making sure the price is known. A bare app id skips lookup in
    /// `resolve_app`; licensing decisions need the real catalog entry.
    fn resolve_app_with_price(&self, identity: &AppIdentity) -> Result<App> {
        let app = self.resolve_app(identity)?;
        if !app.bundle_id.is_empty() {
            return Ok(app);
        }
        self.catalog().lookup_by_id(app.id)
    }
}
