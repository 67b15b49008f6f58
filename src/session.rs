//! Account records and session lifecycle
//!
//! The session is the single point of truth for "am I authenticated". It owns
//! the account loaded from the keychain and the cookie jar, and it is the only
//! component allowed to attach that identity to outbound calls. The account is
//! created at login, replaced wholesale on re-login, and destroyed at logout
//! or on a password-token-expired signal.

use crate::cookies::CookieJar;
use crate::keychain::FileKeychain;
use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

const ACCOUNT_KEY: &str = "account";
const GUID_KEY: &str = "guid";

/// Identity derived from a successful authentication.
///
/// Field names in the serialized form are part of the keychain file contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub email: String,
    pub name: String,
    #[serde(rename = "passwordToken")]
    pub password_token: String,
    #[serde(rename = "directoryServicesIdentifier")]
    pub directory_services_id: String,
    #[serde(rename = "storeFront")]
    pub store_front: String,
}

impl Account {
    /// ISO country code for the account's storefront.
    pub fn country_code(&self) -> Result<&'static str> {
        crate::constants::country_for_storefront(&self.store_front)
            .ok_or_else(|| Error::Protocol(format!("unknown storefront: {}", self.store_front)))
    }
}

pub struct Session {
    keychain: FileKeychain,
    jar: Arc<CookieJar>,
    account: RwLock<Option<Account>>,
}

impl Session {
    /// Load the persisted session from the data directory.
    ///
    /// A corrupt keychain or cookie file degrades to "no session" instead of
    /// failing: the user simply has to sign in again. A persisted account
    /// with an empty password token or an empty cookie jar is likewise
    /// treated as expired and dropped.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let keychain = match FileKeychain::open(data_dir.join("keychain.json")) {
            Ok(k) => k,
            Err(Error::Storage(_)) => FileKeychain::fresh(data_dir.join("keychain.json")),
            Err(e) => return Err(e),
        };
        let jar = Arc::new(CookieJar::open(data_dir.join("cookies.txt")));

        let account = match keychain.get(ACCOUNT_KEY) {
            Ok(raw) => match serde_json::from_slice::<Account>(&raw) {
                Ok(account) if !account.password_token.is_empty() && !jar.is_empty() => {
                    Some(account)
                }
                _ => None,
            },
            Err(_) => None,
        };

        Ok(Self {
            keychain,
            jar,
            account: RwLock::new(account),
        })
    }

    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.read().expect("session lock poisoned").is_some()
    }

    /// The active account, or `NotSignedIn`.
    pub fn account(&self) -> Result<Account> {
        self.account
            .read()
            .expect("session lock poisoned")
            .clone()
            .ok_or(Error::NotSignedIn)
    }

    /// Install a freshly authenticated account, persisting it to the keychain.
    pub fn set_account(&self, account: Account) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&account)?;
        self.keychain.set(ACCOUNT_KEY, &payload)?;
        *self.account.write().expect("session lock poisoned") = Some(account);
        Ok(())
    }

    /// Drop the account and all session cookies.
    ///
    /// Used by logout and by any caller that received a token-expired signal;
    /// local state always wins, so this cannot fail on network conditions.
    pub fn invalidate(&self) -> Result<()> {
        *self.account.write().expect("session lock poisoned") = None;
        self.keychain.remove(ACCOUNT_KEY)?;
        self.jar.clear()?;
        Ok(())
    }

    /// Stable device identifier sent as `guid` on private-endpoint calls.
    ///
    /// Generated once per data directory and persisted; the store uses it to
    /// bind download grants and SINFs to a device.
    pub fn device_guid(&self) -> Result<String> {
        if let Ok(raw) = self.keychain.get(GUID_KEY) {
            if let Ok(guid) = String::from_utf8(raw) {
                if !guid.is_empty() {
                    return Ok(guid);
                }
            }
        }

        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        let guid = hex::encode_upper(bytes);
        self.keychain.set(GUID_KEY, guid.as_bytes())?;
        Ok(guid)
    }
}
