//! End-to-end protocol tests against a mock store.
//!
//! Every endpoint the client talks to is stood up with mockito, and the
//! session state lives in a per-test temporary data directory, so these run
//! hermetically and in parallel.
//!
//! ```bash
//! cargo test --test store_flow
//! ```

use ipagrab::session::Session;
use ipagrab::{Account, AppIdentity, AppStore, CancelToken, Config, Error, LicenseOutcome};
use mockito::{Matcher, Server, ServerGuard};
use std::io::Write;
use tempfile::TempDir;
use url::Url;

fn test_config(server: &ServerGuard, data_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.endpoints.api_url = server.url();
    config.endpoints.store_url = server.url();
    config.endpoints.download_url = server.url();
    config.data_dir = Some(data_dir.path().to_path_buf());
    config
}

/// Seed a signed-in session on disk, the way a prior login would have left it.
fn seed_session(data_dir: &TempDir, server: &ServerGuard) {
    let session = Session::open(data_dir.path()).unwrap();
    let url = Url::parse(&server.url()).unwrap();
    session
        .cookie_jar()
        .absorb(&url, &["mz_at0=sessiontoken".to_string()])
        .unwrap();
    session
        .set_account(Account {
            email: "user@example.com".to_string(),
            name: "Test User".to_string(),
            password_token: "ptoken".to_string(),
            directory_services_id: "12345".to_string(),
            store_front: "143441-1,29".to_string(),
        })
        .unwrap();
}

fn plist_body(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
{}
</dict>
</plist>"#,
        inner
    )
}

/// A minimal but structurally valid IPA: one app bundle with an Info.plist,
/// an executable and a SINF manifest.
fn mock_ipa_bytes() -> Vec<u8> {
    let mut info = plist::Dictionary::new();
    info.insert(
        "CFBundleExecutable".to_string(),
        plist::Value::String("Demo".to_string()),
    );
    let mut info_bytes = Vec::new();
    plist::to_writer_xml(&mut info_bytes, &plist::Value::Dictionary(info)).unwrap();

    let mut manifest = plist::Dictionary::new();
    manifest.insert(
        "SinfPaths".to_string(),
        plist::Value::Array(vec![plist::Value::String("SC_Info/Demo.sinf".to_string())]),
    );
    let mut manifest_bytes = Vec::new();
    plist::to_writer_xml(&mut manifest_bytes, &plist::Value::Dictionary(manifest)).unwrap();

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file("Payload/Demo.app/Info.plist", options)
        .unwrap();
    writer.write_all(&info_bytes).unwrap();
    writer.start_file("Payload/Demo.app/Demo", options).unwrap();
    writer.write_all(b"binarybits").unwrap();
    writer
        .start_file("Payload/Demo.app/SC_Info/Manifest.plist", options)
        .unwrap();
    writer.write_all(&manifest_bytes).unwrap();
    writer.finish().unwrap().into_inner()
}

fn grant_body(cdn_url: &str, size: usize) -> String {
    plist_body(&format!(
        r#"<key>songList</key>
<array>
<dict>
  <key>URL</key><string>{}</string>
  <key>asset-info</key>
  <dict><key>file-size</key><integer>{}</integer></dict>
  <key>metadata</key>
  <dict>
    <key>softwareVersionExternalIdentifier</key><integer>850</integer>
    <key>bundleShortVersionString</key><string>2.0</string>
    <key>bundleVersion</key><string>42</string>
    <key>releaseDate</key><string>2024-01-15T10:00:00Z</string>
    <key>softwareVersionBundleId</key><string>com.example.demo</string>
    <key>artistName</key><string>Example Inc</string>
    <key>itemName</key><string>Demo</string>
    <key>genre</key><string>Utilities</string>
    <key>softwareVersionExternalIdentifiers</key>
    <array><integer>100</integer><integer>850</integer></array>
  </dict>
  <key>sinfs</key>
  <array>
    <dict>
      <key>id</key><integer>0</integer>
      <key>sinf</key><data>3q2+7w==</data>
    </dict>
  </array>
</dict>
</array>"#,
        cdn_url, size
    ))
}

// ============================================================================
// Authentication
// ============================================================================

mod login {
    use super::*;
    use ipagrab::LoginOutcome;

    #[test]
    fn test_two_factor_round_trip_strips_code_whitespace() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();

        // First call: no code supplied, the store challenges.
        let challenge = server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/authenticate")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("secretpw</string>".to_string()))
            .with_status(200)
            .with_body(plist_body(
                r#"<key>customerMessage</key><string>MZFinance.BadLogin.Configurator_message</string>"#,
            ))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let outcome = store.login("user@example.com", "secretpw", None).unwrap();
        assert!(matches!(outcome, LoginOutcome::VerificationRequired { .. }));
        assert!(!store.is_authenticated());
        challenge.assert();

        // Second call: code pasted with a space; password and code are sent
        // concatenated with the whitespace removed.
        let success = server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/authenticate")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("secretpw123456</string>".to_string()))
            .with_status(200)
            .with_header("x-set-apple-store-front", "143441-1,29")
            .with_header("Set-Cookie", "mz_at0=fresh; Path=/")
            .with_body(plist_body(
                r#"<key>passwordToken</key><string>ptoken</string>
<key>dsPersonId</key><string>12345</string>
<key>accountInfo</key>
<dict>
  <key>appleId</key><string>user@example.com</string>
  <key>address</key>
  <dict><key>firstName</key><string>Test</string><key>lastName</key><string>User</string></dict>
</dict>"#,
            ))
            .create();

        let outcome = store
            .login("user@example.com", "secretpw", Some("123 456"))
            .unwrap();
        match outcome {
            LoginOutcome::Authenticated(account) => {
                assert_eq!(account.email, "user@example.com");
                assert_eq!(account.name, "Test User");
                assert_eq!(account.store_front, "143441-1,29");
            }
            other => panic!("expected authentication, got {:?}", other),
        }
        assert!(store.is_authenticated());
        success.assert();
    }

    #[test]
    fn test_invalid_credentials_after_first_attempt() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();

        // The first -5000 is retried as pod churn; the second one is real.
        let rejected = server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/authenticate")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(plist_body(
                r#"<key>failureType</key><string>-5000</string>"#,
            ))
            .expect(2)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store
            .login("user@example.com", "wrongpw", None)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_credentials");
        rejected.assert();
    }

    #[test]
    fn test_logout_is_local_only() {
        let server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        assert!(store.is_authenticated());

        // No mock endpoints exist; logout must not touch the network.
        store.logout().unwrap();
        assert!(!store.is_authenticated());
        assert_eq!(store.account().unwrap_err().code(), "not_signed_in");

        // The signed-out state survives a restart.
        let reopened = AppStore::new(test_config(&server, &data_dir)).unwrap();
        assert!(!reopened.is_authenticated());
    }
}

// ============================================================================
// Catalog
// ============================================================================

mod catalog {
    use super::*;

    #[test]
    fn test_search_scoped_to_storefront_country() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let search = server
            .mock("GET", "/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("term".to_string(), "demo".to_string()),
                Matcher::UrlEncoded("country".to_string(), "US".to_string()),
                Matcher::UrlEncoded("limit".to_string(), "5".to_string()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"resultCount":1,"results":[{"trackId":42,"bundleId":"com.example.demo","trackName":"Demo","version":"2.0","price":0}]}"#,
            )
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let results = store.search("demo", 5, false).unwrap();
        assert_eq!(results.count, 1);
        assert_eq!(results.results[0].id, 42);
        assert_eq!(results.results[0].bundle_id, "com.example.demo");
        search.assert();
    }

    #[test]
    fn test_search_requires_sign_in() {
        let server = Server::new();
        let data_dir = TempDir::new().unwrap();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store.search("demo", 5, false).unwrap_err();
        assert_eq!(err.code(), "not_signed_in");
    }

    #[test]
    fn test_lookup_missing_app() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        server
            .mock("GET", "/lookup")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"resultCount":0,"results":[]}"#)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store.lookup("com.example.absent").unwrap_err();
        assert_eq!(err.code(), "app_not_found");
    }

    #[test]
    fn test_version_listing() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(grant_body("https://cdn.invalid/demo.ipa", 100))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let versions = store
            .list_versions(&AppIdentity::by_app_id(42), None)
            .unwrap();
        assert_eq!(versions.latest, "850");
        assert_eq!(versions.all, vec!["100".to_string(), "850".to_string()]);
    }

    #[test]
    fn test_metadata_batch_reports_per_version_failures() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("<string>850</string>".to_string()))
            .with_status(200)
            .with_body(grant_body("https://cdn.invalid/demo.ipa", 100))
            .create();

        // The retired build comes back as a license failure.
        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("<string>999</string>".to_string()))
            .with_status(200)
            .with_body(plist_body(
                r#"<key>failureType</key><string>9610</string>"#,
            ))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let records = store
            .version_metadata_batch(
                &AppIdentity::by_app_id(42),
                &["850".to_string(), "999".to_string()],
            )
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "850");
        let good = records[0].1.as_ref().unwrap();
        assert_eq!(good.display_version, "2.0");
        assert_eq!(good.build_number, "42");

        assert_eq!(records[1].0, "999");
        assert_eq!(
            records[1].1.as_ref().unwrap_err().code(),
            "license_required"
        );
    }
}

// ============================================================================
// Licensing
// ============================================================================

mod licensing {
    use super::*;

    fn lookup_mock(server: &mut ServerGuard, price: f64) -> mockito::Mock {
        server
            .mock("GET", "/lookup")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"resultCount":1,"results":[{{"trackId":42,"bundleId":"com.example.demo","trackName":"Demo","version":"2.0","price":{}}}]}}"#,
                price
            ))
            .create()
    }

    #[test]
    fn test_acquiring_held_license_succeeds() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);
        lookup_mock(&mut server, 0.0);

        // The store answers a buy of an already licensed item with a 500.
        server
            .mock("POST", "/WebObjects/MZBuy.woa/wa/buyProduct")
            .with_status(500)
            .with_body(plist_body(""))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let outcome = store.acquire_license(&AppIdentity::by_app_id(42)).unwrap();
        assert_eq!(outcome, LicenseOutcome::AlreadyOwned);
    }

    #[test]
    fn test_fresh_license_acquired() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);
        lookup_mock(&mut server, 0.0);

        server
            .mock("POST", "/WebObjects/MZBuy.woa/wa/buyProduct")
            .with_status(200)
            .with_body(plist_body(
                r#"<key>jingleDocType</key><string>purchaseSuccess</string>
<key>status</key><integer>0</integer>"#,
            ))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let outcome = store.acquire_license(&AppIdentity::by_app_id(42)).unwrap();
        assert_eq!(outcome, LicenseOutcome::Acquired);
    }

    #[test]
    fn test_paid_app_refused_before_any_buy_call() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);
        lookup_mock(&mut server, 3.99);

        // No buyProduct mock: the refusal must happen client-side.
        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store
            .acquire_license(&AppIdentity::by_app_id(42))
            .unwrap_err();
        assert_eq!(err.code(), "purchase_not_allowed");
    }

    #[test]
    fn test_expired_token_invalidates_session() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);
        lookup_mock(&mut server, 0.0);

        server
            .mock("POST", "/WebObjects/MZBuy.woa/wa/buyProduct")
            .with_status(200)
            .with_body(plist_body(
                r#"<key>failureType</key><string>2034</string>"#,
            ))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store
            .acquire_license(&AppIdentity::by_app_id(42))
            .unwrap_err();
        assert_eq!(err.code(), "token_expired");
        assert!(!store.is_authenticated());
    }
}

// ============================================================================
// Download
// ============================================================================

mod download {
    use super::*;

    #[test]
    fn test_download_embeds_license_and_caches() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let ipa = mock_ipa_bytes();
        let cdn_url = format!("{}/cdn/demo.ipa", server.url());

        let grant = server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(grant_body(&cdn_url, ipa.len()))
            .expect(1)
            .create();
        let cdn = server
            .mock("GET", "/cdn/demo.ipa")
            .with_status(200)
            .with_body(ipa.clone())
            .expect(1)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let artifact = store
            .download(&AppIdentity::by_app_id(42), Some("850"), false, None, None)
            .unwrap();

        assert_eq!(artifact.file_name, "42_850.ipa");
        assert_eq!(artifact.sinf_count, 1);
        assert!(artifact.path.exists());

        // The cached package carries the embedded license material.
        let file = std::fs::File::open(&artifact.path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert!(archive.by_name("Payload/Demo.app/SC_Info/Demo.sinf").is_ok());
        assert!(archive.by_name("iTunesMetadata.plist").is_ok());

        // Second request for the same build is served from cache.
        let again = store
            .download(&AppIdentity::by_app_id(42), Some("850"), false, None, None)
            .unwrap();
        assert_eq!(again, artifact);
        grant.assert();
        cdn.assert();
    }

    #[test]
    fn test_download_acquires_missing_license_once() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let ipa = mock_ipa_bytes();
        let cdn_url = format!("{}/cdn/demo.ipa", server.url());

        // The grant endpoint refuses until a license exists: the first call
        // answers with the license failure, the retry with the grant.
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let refusal = plist_body(r#"<key>failureType</key><string>9610</string>"#);
        let granted_body = grant_body(&cdn_url, ipa.len());
        let grant = server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body_from_request(move |_req| {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    refusal.clone().into_bytes()
                } else {
                    granted_body.clone().into_bytes()
                }
            })
            .expect(2)
            .create();
        server
            .mock("GET", "/lookup")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"resultCount":1,"results":[{"trackId":42,"bundleId":"com.example.demo","trackName":"Demo","version":"2.0","price":0}]}"#,
            )
            .create();
        let bought = server
            .mock("POST", "/WebObjects/MZBuy.woa/wa/buyProduct")
            .with_status(200)
            .with_body(plist_body(
                r#"<key>jingleDocType</key><string>purchaseSuccess</string>
<key>status</key><integer>0</integer>"#,
            ))
            .expect(1)
            .create();
        server
            .mock("GET", "/cdn/demo.ipa")
            .with_status(200)
            .with_body(ipa)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let artifact = store
            .download(&AppIdentity::by_app_id(42), None, true, None, None)
            .unwrap();
        assert_eq!(artifact.sinf_count, 1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        grant.assert();
        bought.assert();
    }

    #[test]
    fn test_download_without_license_and_without_purchase_flag() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(plist_body(
                r#"<key>failureType</key><string>9610</string>"#,
            ))
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store
            .download(&AppIdentity::by_app_id(42), None, false, None, None)
            .unwrap_err();
        assert_eq!(err.code(), "license_required");
    }

    #[test]
    fn test_cancelled_download_leaves_no_artifact() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let ipa = mock_ipa_bytes();
        let cdn_url = format!("{}/cdn/demo.ipa", server.url());

        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(grant_body(&cdn_url, ipa.len()))
            .create();
        server
            .mock("GET", "/cdn/demo.ipa")
            .with_status(200)
            .with_body(ipa)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();

        let token = CancelToken::new();
        token.cancel();
        let err = store
            .download(
                &AppIdentity::by_app_id(42),
                Some("850"),
                false,
                None,
                Some(&token),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let cache_dir = store.cache_dir();
        assert!(!cache_dir.join("42_850.ipa").exists());
        assert!(!cache_dir.join("tmp").join("42_850.ipa.part").exists());

        // A clean re-download afterwards succeeds.
        let artifact = store
            .download(&AppIdentity::by_app_id(42), Some("850"), false, None, None)
            .unwrap();
        assert!(artifact.path.exists());
    }

    #[test]
    fn test_truncated_transfer_is_rejected() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let ipa = mock_ipa_bytes();
        let cdn_url = format!("{}/cdn/demo.ipa", server.url());

        // The grant promises more bytes than the CDN delivers.
        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(grant_body(&cdn_url, ipa.len() + 1000))
            .create();
        server
            .mock("GET", "/cdn/demo.ipa")
            .with_status(200)
            .with_body(ipa)
            .create();

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        let err = store
            .download(&AppIdentity::by_app_id(42), Some("850"), false, None, None)
            .unwrap_err();
        assert_eq!(err.code(), "protocol_error");
        assert!(!store.cache_dir().join("42_850.ipa").exists());
    }

    #[test]
    fn test_progress_reported_during_download() {
        let mut server = Server::new();
        let data_dir = TempDir::new().unwrap();
        seed_session(&data_dir, &server);

        let ipa = mock_ipa_bytes();
        let cdn_url = format!("{}/cdn/demo.ipa", server.url());

        server
            .mock("POST", "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(grant_body(&cdn_url, ipa.len()))
            .create();
        server
            .mock("GET", "/cdn/demo.ipa")
            .with_status(200)
            .with_body(ipa.clone())
            .create();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ipagrab::ProgressCallback =
            std::sync::Arc::new(move |_stage, done, total| {
                sink.lock().unwrap().push((done, total));
            });

        let store = AppStore::new(test_config(&server, &data_dir)).unwrap();
        store
            .download(
                &AppIdentity::by_app_id(42),
                Some("850"),
                false,
                Some(&progress),
                None,
            )
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        let (done, total) = *seen.last().unwrap();
        assert_eq!(done, ipa.len() as u64);
        assert_eq!(total, ipa.len() as u64);
    }
}
