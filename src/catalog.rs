//! Catalog search, lookup and version enumeration
//!
//! Search and lookup go through the public iTunes API, scoped by the
//! account's storefront country. Version enumeration and per-version
//! metadata ride on the private download endpoint, which returns the full
//! external-version-identifier history alongside each item.
//!
//! tvOS search results do not carry the external version identifier needed
//! for direct downloads; that is an upstream limitation of the search API,
//! and callers wanting tvOS builds must go through `list_versions` with a
//! known sibling id instead.

use crate::download;
use crate::http::{ResponseFormat, StoreClient, StoreRequest};
use crate::session::Session;
use crate::{Config, Error, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How an app is referred to by callers: numeric id, bundle id, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppIdentity {
    pub app_id: Option<u64>,
    pub bundle_id: Option<String>,
}

impl AppIdentity {
    pub fn new(app_id: Option<u64>, bundle_id: Option<String>) -> Result<Self> {
        if app_id.is_none() && bundle_id.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Other(
                "either an app id or a bundle id must be supplied".to_string(),
            ));
        }
        Ok(Self { app_id, bundle_id })
    }

    pub fn by_app_id(app_id: u64) -> Self {
        Self {
            app_id: Some(app_id),
            bundle_id: None,
        }
    }

    pub fn by_bundle_id(bundle_id: &str) -> Self {
        Self {
            app_id: None,
            bundle_id: Some(bundle_id.to_string()),
        }
    }
}

/// One catalog entry, as returned by search and lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub id: u64,
    #[serde(default)]
    pub bundle_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub count: usize,
    pub results: Vec<App>,
}

/// The version history of one app.
#[derive(Debug, Clone, Serialize)]
pub struct VersionList {
    /// External version id of the currently shipping build.
    pub latest: String,
    /// Every known external version id, oldest first as the store reports it.
    pub all: Vec<String>,
}

/// Detail record for one specific shipped build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub external_version_id: String,
    pub display_version: String,
    pub build_number: String,
    pub release_date: DateTime<FixedOffset>,
    pub file_size: u64,
    pub bundle_id: String,
    pub artist_name: String,
    pub item_name: String,
    pub genre: String,
    pub age_rating: String,
    pub requires_rosetta: bool,
    pub runs_on_apple_silicon: bool,
    pub copyright: String,
}

pub struct CatalogClient<'a> {
    client: &'a StoreClient,
    config: &'a Config,
    session: &'a Session,
}

impl<'a> CatalogClient<'a> {
    pub fn new(client: &'a StoreClient, config: &'a Config, session: &'a Session) -> Self {
        Self {
            client,
            config,
            session,
        }
    }

    /// Search the catalog. The limit is clamped to the configured range and
    /// results keep the remote ranking order.
    pub fn search(&self, term: &str, limit: u32, include_tv_apps: bool) -> Result<SearchResults> {
        let account = self.session.account()?;
        let country = account.country_code()?;
        let limit = self.config.clamp_search_limit(limit);

        let mut entity = "software,iPadSoftware".to_string();
        if include_tv_apps {
            entity.push_str(",tvSoftware");
        }

        let url = format!(
            "{}{}?entity={}&limit={}&media=software&term={}&country={}",
            self.config.endpoints.api_url,
            crate::constants::SEARCH_PATH,
            urlencoding::encode(&entity),
            limit,
            urlencoding::encode(term),
            country,
        );

        let response = self
            .client
            .send(StoreRequest::get(url, ResponseFormat::Json))?;
        let body = response.json()?;

        let results: Vec<App> = body
            .get("results")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(app_from_json).collect())
            .unwrap_or_default();

        let count = body
            .get("resultCount")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(results.len());

        Ok(SearchResults { count, results })
    }

    /// Look up a single app by bundle id.
    pub fn lookup(&self, bundle_id: &str) -> Result<App> {
        let account = self.session.account()?;
        let country = account.country_code()?;

        let url = format!(
            "{}{}?entity=software,iPadSoftware&limit=1&media=software&bundleId={}&country={}",
            self.config.endpoints.api_url,
            crate::constants::LOOKUP_PATH,
            urlencoding::encode(bundle_id),
            country,
        );

        let response = self
            .client
            .send(StoreRequest::get(url, ResponseFormat::Json))?;
        let body = response.json()?;

        body.get("results")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .and_then(app_from_json)
            .ok_or_else(|| Error::AppNotFound(bundle_id.to_string()))
    }

    /// Look up a single app by its numeric store id.
    pub fn lookup_by_id(&self, app_id: u64) -> Result<App> {
        let account = self.session.account()?;
        let country = account.country_code()?;

        let url = format!(
            "{}{}?entity=software,iPadSoftware&limit=1&media=software&id={}&country={}",
            self.config.endpoints.api_url,
            crate::constants::LOOKUP_PATH,
            app_id,
            country,
        );

        let response = self
            .client
            .send(StoreRequest::get(url, ResponseFormat::Json))?;
        let body = response.json()?;

        body.get("results")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .and_then(app_from_json)
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
    }

    /// Resolve an identity to a concrete catalog entry.
    ///
    /// A bundle id triggers a lookup; a bare app id is taken at face value.
    /// When both are supplied the lookup result must agree with the app id.
    pub fn resolve(&self, identity: &AppIdentity) -> Result<App> {
        match (&identity.bundle_id, identity.app_id) {
            (Some(bundle_id), expected) if !bundle_id.is_empty() => {
                let app = self.lookup(bundle_id)?;
                if let Some(expected) = expected {
                    if app.id != expected {
                        return Err(Error::Other(format!(
                            "bundle id '{}' resolves to app {} but app id {} was supplied",
                            bundle_id, app.id, expected
                        )));
                    }
                }
                Ok(app)
            }
            (_, Some(app_id)) => Ok(App {
                id: app_id,
                bundle_id: String::new(),
                name: String::new(),
                version: String::new(),
                price: 0.0,
            }),
            _ => Err(Error::Other(
                "either an app id or a bundle id must be supplied".to_string(),
            )),
        }
    }

    /// List the external version identifiers of an app.
    ///
    /// When `filter_external_version_id` is supplied, the item request is
    /// scoped around that id; this is the only route to sibling builds for
    /// tvOS apps, whose search results carry no version identifier.
    pub fn list_versions(
        &self,
        identity: &AppIdentity,
        filter_external_version_id: Option<&str>,
    ) -> Result<VersionList> {
        let app = self.resolve(identity)?;
        let item = download::request_item(
            self.client,
            self.config,
            self.session,
            app.id,
            filter_external_version_id,
        )?;
        let metadata = item_metadata(&item)?;

        let all = metadata
            .get("softwareVersionExternalIdentifiers")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::Protocol("missing version identifier list".to_string()))?
            .iter()
            .map(crate::http::plist_to_string)
            .collect();

        let latest = metadata
            .get("softwareVersionExternalIdentifier")
            .map(crate::http::plist_to_string)
            .ok_or_else(|| Error::Protocol("missing latest version identifier".to_string()))?;

        Ok(VersionList { latest, all })
    }

    /// Fetch the detail record for one external version id.
    pub fn version_metadata(
        &self,
        identity: &AppIdentity,
        external_version_id: &str,
    ) -> Result<VersionRecord> {
        let app = self.resolve(identity)?;
        self.version_metadata_for_app_id(app.id, external_version_id)
    }

    fn version_metadata_for_app_id(
        &self,
        app_id: u64,
        external_version_id: &str,
    ) -> Result<VersionRecord> {
        let item = download::request_item(
            self.client,
            self.config,
            self.session,
            app_id,
            Some(external_version_id),
        )?;
        version_record_from_item(&item, external_version_id)
    }

    /// Fetch detail records for many version ids concurrently.
    ///
    /// Each fetch is independent: the batch reports success or failure per
    /// id, in input order, and one retired or bogus id never empties the
    /// rest of the result set. The shared session is read-only for the
    /// duration of the batch.
    pub fn version_metadata_batch(
        &self,
        identity: &AppIdentity,
        external_version_ids: &[String],
    ) -> Result<Vec<(String, Result<VersionRecord>)>> {
        let app = self.resolve(identity)?;
        let workers = self.config.search.batch_workers.max(1).min(external_version_ids.len().max(1));

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<(String, Result<VersionRecord>)>>> =
            Mutex::new((0..external_version_ids.len()).map(|_| None).collect());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= external_version_ids.len() {
                        break;
                    }
                    let id = &external_version_ids[index];
                    let outcome = self.version_metadata_for_app_id(app.id, id);
                    let mut slots = slots.lock().expect("batch lock poisoned");
                    slots[index] = Some((id.clone(), outcome));
                });
            }
        });

        let slots = slots.into_inner().expect("batch lock poisoned");
        Ok(slots.into_iter().map(|slot| slot.expect("batch slot unfilled")).collect())
    }
}

fn app_from_json(item: &serde_json::Value) -> Option<App> {
    let id = item
        .get("trackId")
        .or_else(|| item.get("id"))
        .and_then(|v| v.as_u64())?;
    Some(App {
        id,
        bundle_id: string_field(item, "bundleId"),
        name: string_field(item, "trackName"),
        version: string_field(item, "version"),
        price: item.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0),
    })
}

fn string_field(item: &serde_json::Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn item_metadata(item: &plist::Dictionary) -> Result<&plist::Dictionary> {
    item.get("metadata")
        .and_then(|v| v.as_dictionary())
        .ok_or_else(|| Error::Protocol("item without metadata".to_string()))
}

fn meta_str(metadata: &plist::Dictionary, key: &str) -> String {
    metadata
        .get(key)
        .and_then(|v| v.as_string())
        .unwrap_or("N/A")
        .to_string()
}

fn meta_bool(metadata: &plist::Dictionary, key: &str) -> bool {
    metadata
        .get(key)
        .and_then(|v| v.as_boolean())
        .unwrap_or(false)
}

pub(crate) fn version_record_from_item(
    item: &plist::Dictionary,
    external_version_id: &str,
) -> Result<VersionRecord> {
    let metadata = item_metadata(item)?;

    let release_raw = metadata
        .get("releaseDate")
        .map(crate::http::plist_to_string)
        .ok_or_else(|| Error::Protocol("missing release date".to_string()))?;
    let release_date = DateTime::parse_from_rfc3339(&release_raw)
        .map_err(|e| Error::Protocol(format!("unparseable release date '{}': {}", release_raw, e)))?;

    let file_size = item
        .get("asset-info")
        .and_then(|v| v.as_dictionary())
        .and_then(|info| info.get("file-size"))
        .and_then(|v| v.as_unsigned_integer())
        .unwrap_or(0);

    let age_rating = metadata
        .get("appAgeRatings")
        .and_then(|v| v.as_dictionary())
        .and_then(|ratings| ratings.get("US"))
        .and_then(|v| v.as_dictionary())
        .and_then(|us| us.get("label"))
        .and_then(|v| v.as_string())
        .unwrap_or("N/A")
        .to_string();

    Ok(VersionRecord {
        external_version_id: external_version_id.to_string(),
        display_version: meta_str(metadata, "bundleShortVersionString"),
        build_number: meta_str(metadata, "bundleVersion"),
        release_date,
        file_size,
        bundle_id: meta_str(metadata, "softwareVersionBundleId"),
        artist_name: meta_str(metadata, "artistName"),
        item_name: meta_str(metadata, "itemName"),
        genre: meta_str(metadata, "genre"),
        age_rating,
        requires_rosetta: meta_bool(metadata, "requiresRosetta"),
        runs_on_apple_silicon: meta_bool(metadata, "runsOnAppleSilicon"),
        copyright: meta_str(metadata, "copyright"),
    })
}
