//! License material embedding
//!
//! A raw CDN download is not installable: the store hands the DRM license out
//! of band as SINF blobs, and devices expect them inside the package under
//! the app bundle's `SC_Info` directory, together with an
//! `iTunesMetadata.plist` describing the item and the account that licensed
//! it. This module rewrites the archive once, copying the original entries
//! verbatim and appending the license material.

use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// One DRM license blob from a download grant.
#[derive(Debug, Clone, PartialEq)]
pub struct SinfBlob {
    pub id: i64,
    pub data: Vec<u8>,
}

/// Rewrite the archive at `source` into `dest` with license material embedded.
///
/// Returns the number of SINF entries written. The bundle's
/// `SC_Info/Manifest.plist` dictates where each blob lands; packages without
/// a manifest get a single `SC_Info/<executable>.sinf` next to the main
/// binary.
pub fn embed(
    source: &Path,
    dest: &Path,
    sinfs: &[SinfBlob],
    metadata: &plist::Dictionary,
    apple_id: &str,
) -> Result<usize> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;

    let bundle_dir = find_bundle_dir(&mut archive)?;
    let sinf_paths = sinf_entry_paths(&mut archive, &bundle_dir, sinfs)?;

    let mut metadata = metadata.clone();
    metadata.insert(
        "apple-id".to_string(),
        plist::Value::String(apple_id.to_string()),
    );
    metadata.insert(
        "userName".to_string(),
        plist::Value::String(apple_id.to_string()),
    );
    let mut metadata_bytes = Vec::new();
    plist::to_writer_binary(&mut metadata_bytes, &plist::Value::Dictionary(metadata))?;

    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let mut new_names: Vec<&str> = sinf_paths.iter().map(|(path, _)| path.as_str()).collect();
    new_names.push("iTunesMetadata.plist");

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        // A re-downloaded package may already carry stale license entries.
        if new_names.iter().any(|name| *name == entry.name()) {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file("iTunesMetadata.plist", options)?;
    std::io::Write::write_all(&mut writer, &metadata_bytes)?;

    for (path, blob) in &sinf_paths {
        writer.start_file(path.as_str(), options)?;
        std::io::Write::write_all(&mut writer, &blob.data)?;
    }

    writer.finish()?;
    Ok(sinf_paths.len())
}

/// Locate the main app bundle directory, e.g. `Payload/Thing.app`.
///
/// Watch companion bundles carry their own `Info.plist`; they are skipped.
fn find_bundle_dir<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    for index in 0..archive.len() {
        let name = archive.by_index_raw(index)?.name().to_string();
        if name.starts_with("Payload/")
            && name.ends_with(".app/Info.plist")
            && !name.contains("/Watch/")
            && name.matches('/').count() == 2
        {
            return Ok(name.trim_end_matches("/Info.plist").to_string());
        }
    }
    Err(Error::Protocol(
        "package has no app bundle Info.plist".to_string(),
    ))
}

/// Work out the archive path for each SINF blob.
fn sinf_entry_paths<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    bundle_dir: &str,
    sinfs: &[SinfBlob],
) -> Result<Vec<(String, SinfBlob)>> {
    if sinfs.is_empty() {
        return Err(Error::Protocol(
            "download grant carried no license material".to_string(),
        ));
    }

    let manifest_path = format!("{}/SC_Info/Manifest.plist", bundle_dir);
    if let Some(paths) = read_manifest_paths(archive, &manifest_path)? {
        return Ok(paths
            .iter()
            .zip(sinfs.iter())
            .map(|(rel, blob)| (format!("{}/{}", bundle_dir, rel), blob.clone()))
            .collect());
    }

    // No manifest: place the first blob next to the executable.
    let executable = read_bundle_executable(archive, bundle_dir)?;
    Ok(vec![(
        format!("{}/SC_Info/{}.sinf", bundle_dir, executable),
        sinfs[0].clone(),
    )])
}

fn read_manifest_paths<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    manifest_path: &str,
) -> Result<Option<Vec<String>>> {
    let bytes = match read_entry(archive, manifest_path)? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let manifest: plist::Value = plist::Value::from_reader(Cursor::new(bytes))?;
    let paths = manifest
        .as_dictionary()
        .and_then(|d| d.get("SinfPaths"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_string())
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if paths.is_empty() {
        Ok(None)
    } else {
        Ok(Some(paths))
    }
}

fn read_bundle_executable<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    bundle_dir: &str,
) -> Result<String> {
    let info_path = format!("{}/Info.plist", bundle_dir);
    let bytes = read_entry(archive, &info_path)?
        .ok_or_else(|| Error::Protocol(format!("package is missing {}", info_path)))?;
    let info: plist::Value = plist::Value::from_reader(Cursor::new(bytes))?;
    info.as_dictionary()
        .and_then(|d| d.get("CFBundleExecutable"))
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Protocol("bundle Info.plist has no executable name".to_string()))
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
