//! Download grants, the artifact cache and IPA retrieval
//!
//! A download happens in two steps: the private endpoint issues a short-lived
//! grant (signed CDN URL, expected size, SINF license blobs and the item
//! metadata), then the binary is streamed from the CDN, patched with the
//! license material and placed in the on-disk cache.
//!
//! Cache entries are keyed by `(app_id, external_version_id)`; the same build
//! is only ever fetched once per data directory. Partial transfers land in a
//! `tmp/` staging area and are resumed with HTTP range requests, and the final
//! artifact only appears under its cache path via an atomic rename, so a
//! visible `.ipa` is always complete.

use crate::constants::{DOWNLOAD_PATH, FAILURE_LICENSE_NOT_FOUND, FAILURE_PASSWORD_TOKEN_EXPIRED};
use crate::http::{plist_to_string, ResponseFormat, StoreClient, StoreRequest};
use crate::session::Session;
use crate::sinf::{self, SinfBlob};
use crate::{Config, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const CHUNK_SIZE: usize = 256 * 1024;

/// Progress callback: `(stage, done_bytes, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// Cooperative cancellation for an in-flight download.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A resolved download grant for one specific build.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub url: String,
    pub file_size: u64,
    pub external_version_id: String,
    pub display_version: String,
    pub sinfs: Vec<SinfBlob>,
    pub metadata: plist::Dictionary,
}

/// Call the download endpoint and return the first granted item.
///
/// This is also the backing call for version enumeration; the grant item
/// carries the full external-version history in its metadata.
pub(crate) fn request_item(
    client: &StoreClient,
    config: &Config,
    session: &Session,
    app_id: u64,
    external_version_id: Option<&str>,
) -> Result<plist::Dictionary> {
    let account = session.account()?;
    let guid = session.device_guid()?;

    let mut body = plist::Dictionary::new();
    body.insert(
        "creditDisplay".to_string(),
        plist::Value::String(String::new()),
    );
    body.insert("guid".to_string(), plist::Value::String(guid.clone()));
    body.insert(
        "salableAdamId".to_string(),
        plist::Value::Integer((app_id as i64).into()),
    );
    if let Some(version_id) = external_version_id {
        body.insert(
            "externalVersionId".to_string(),
            plist::Value::String(version_id.to_string()),
        );
    }

    let url = format!(
        "{}{}?guid={}",
        config.endpoints.download_url, DOWNLOAD_PATH, guid
    );
    let request = StoreRequest::post(url, body, ResponseFormat::Plist)
        .header("iCloud-DSID", &account.directory_services_id)
        .header("X-Dsid", &account.directory_services_id);

    let response = client.send(request)?;
    let failure = response.failure_type();

    if failure == FAILURE_PASSWORD_TOKEN_EXPIRED {
        session.invalidate()?;
        return Err(Error::TokenExpired);
    }
    if failure == FAILURE_LICENSE_NOT_FOUND {
        return Err(Error::LicenseRequired);
    }
    if !failure.is_empty() {
        let message = response.customer_message();
        if message.is_empty() {
            return Err(Error::Other(format!(
                "download request failed (failureType {})",
                failure
            )));
        }
        return Err(Error::Other(message));
    }

    response
        .dict()?
        .get("songList")
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .and_then(|v| v.as_dictionary())
        .cloned()
        .ok_or_else(|| Error::Protocol("download response without items".to_string()))
}

/// Resolve a download grant for an app, optionally pinned to a version.
pub fn resolve_grant(
    client: &StoreClient,
    config: &Config,
    session: &Session,
    app_id: u64,
    external_version_id: Option<&str>,
) -> Result<DownloadGrant> {
    let item = request_item(client, config, session, app_id, external_version_id)?;
    grant_from_item(&item)
}

fn grant_from_item(item: &plist::Dictionary) -> Result<DownloadGrant> {
    let url = item
        .get("URL")
        .and_then(|v| v.as_string())
        .ok_or_else(|| Error::Protocol("grant without a download URL".to_string()))?
        .to_string();

    let metadata = item
        .get("metadata")
        .and_then(|v| v.as_dictionary())
        .cloned()
        .ok_or_else(|| Error::Protocol("grant without item metadata".to_string()))?;

    let file_size = match item.get("asset-info").and_then(|v| v.as_dictionary()) {
        Some(info) => info
            .get("file-size")
            .and_then(|v| v.as_unsigned_integer())
            .unwrap_or(0),
        None => 0,
    };

    let external_version_id = metadata
        .get("softwareVersionExternalIdentifier")
        .map(plist_to_string)
        .ok_or_else(|| Error::Protocol("grant without a version identifier".to_string()))?;

    let display_version = metadata
        .get("bundleShortVersionString")
        .and_then(|v| v.as_string())
        .unwrap_or_default()
        .to_string();

    let mut sinfs = Vec::new();
    if let Some(entries) = item.get("sinfs").and_then(|v| v.as_array()) {
        for entry in entries {
            let Some(dict) = entry.as_dictionary() else {
                continue;
            };
            let id = dict
                .get("id")
                .and_then(|v| v.as_signed_integer())
                .unwrap_or(0);
            let data = dict
                .get("sinf")
                .and_then(|v| v.as_data())
                .ok_or_else(|| Error::Protocol("grant with a malformed sinf entry".to_string()))?
                .to_vec();
            sinfs.push(SinfBlob { id, data });
        }
    }

    Ok(DownloadGrant {
        url,
        file_size,
        external_version_id,
        display_version,
        sinfs,
        metadata,
    })
}

/// A complete, cached IPA ready to hand to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub file_name: String,
    pub sinf_count: usize,
}

impl CachedArtifact {
    /// Open the package for streaming.
    pub fn open(&self) -> Result<fs::File> {
        Ok(fs::File::open(&self.path)?)
    }
}

/// Sidecar record persisted next to each cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    size: u64,
    #[serde(rename = "sinfCount")]
    sinf_count: usize,
    #[serde(rename = "displayVersion")]
    display_version: String,
    #[serde(rename = "externalVersionId")]
    external_version_id: String,
    #[serde(rename = "appId")]
    app_id: u64,
}

/// The on-disk artifact cache under `<data_dir>/cache`.
///
/// A per-key lock map serializes concurrent downloads of the same build;
/// distinct builds proceed in parallel.
pub struct ArtifactCache {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("cache"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(app_id: u64, external_version_id: &str) -> String {
        format!("{}_{}", app_id, external_version_id)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.ipa", key))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn part_path(&self, key: &str) -> PathBuf {
        self.dir.join("tmp").join(format!("{}.ipa.part", key))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("cache lock poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Look up a cached entry, verifying it against its sidecar record.
    ///
    /// An entry whose size disagrees with the record is treated as absent.
    pub fn lookup(&self, app_id: u64, external_version_id: &str) -> Option<CachedArtifact> {
        let key = Self::key(app_id, external_version_id);
        let path = self.entry_path(&key);
        let record: CacheRecord =
            serde_json::from_str(&fs::read_to_string(self.record_path(&key)).ok()?).ok()?;
        let size = fs::metadata(&path).ok()?.len();
        if size != record.size {
            return None;
        }
        Some(CachedArtifact {
            file_name: path.file_name()?.to_string_lossy().into_owned(),
            path,
            size,
            sinf_count: record.sinf_count,
        })
    }
}

/// Fetch the granted binary, embed its license material and install it into
/// the cache. Returns the finished artifact.
///
/// Cancellation discards the partial transfer; a transport failure keeps it,
/// so the next attempt resumes where this one stopped.
pub fn fetch_and_package(
    client: &StoreClient,
    cache: &ArtifactCache,
    apple_id: &str,
    app_id: u64,
    grant: &DownloadGrant,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
) -> Result<CachedArtifact> {
    let key = ArtifactCache::key(app_id, &grant.external_version_id);
    let entry_lock = cache.lock_for(&key);
    let _guard = entry_lock.lock().expect("cache entry lock poisoned");

    // Another thread may have finished this build while we waited.
    if let Some(hit) = cache.lookup(app_id, &grant.external_version_id) {
        return Ok(hit);
    }

    let part = cache.part_path(&key);
    if let Some(parent) = part.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Storage(format!("failed to create cache dir: {}", e)))?;
    }

    fetch_to_part(client, grant, &part, progress, cancel)?;

    let actual = fs::metadata(&part)?.len();
    if grant.file_size > 0 && actual != grant.file_size {
        fs::remove_file(&part).ok();
        return Err(Error::Protocol(format!(
            "download size mismatch: expected {} bytes, got {}",
            grant.file_size, actual
        )));
    }

    // Patch into a second staging file, then atomically install.
    let patched = cache.dir.join("tmp").join(format!("{}.ipa.patched", key));
    let sinf_count = sinf::embed(&part, &patched, &grant.sinfs, &grant.metadata, apple_id)?;
    fs::remove_file(&part).ok();

    let final_path = cache.entry_path(&key);
    let size = fs::metadata(&patched)?.len();
    fs::rename(&patched, &final_path)
        .map_err(|e| Error::Storage(format!("failed to install cache entry: {}", e)))?;

    let record = CacheRecord {
        size,
        sinf_count,
        display_version: grant.display_version.clone(),
        external_version_id: grant.external_version_id.clone(),
        app_id,
    };
    fs::write(
        cache.record_path(&key),
        serde_json::to_string_pretty(&record)?,
    )
    .map_err(|e| Error::Storage(format!("failed to write cache record: {}", e)))?;

    Ok(CachedArtifact {
        file_name: final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: final_path,
        size,
        sinf_count,
    })
}

fn fetch_to_part(
    client: &StoreClient,
    grant: &DownloadGrant,
    part: &Path,
    progress: Option<&ProgressCallback>,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    let resume_from = fs::metadata(part).map(|m| m.len()).unwrap_or(0);
    let mut response = client.fetch_binary(&grant.url, Some(resume_from))?;

    // A 200 on a resume attempt means the server restarted from zero.
    let mut file = if resume_from > 0 && response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
        fs::OpenOptions::new().append(true).open(part)?
    } else {
        fs::File::create(part)?
    };

    let mut done = if response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
        resume_from
    } else {
        0
    };
    let total = grant.file_size;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                drop(file);
                fs::remove_file(part).ok();
                return Err(Error::Cancelled);
            }
        }

        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        done += n as u64;
        if let Some(report) = progress {
            report("downloading", done, total);
        }
    }

    file.flush()?;
    Ok(())
}
