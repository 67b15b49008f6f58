//! Persistent session cookies
//!
//! The store issues session cookies during authentication and expects them on
//! every subsequent private-endpoint call. The jar persists them in the
//! Netscape `cookies.txt` text format (tab-separated
//! `domain include_subdomains path secure expires name value`), which is an
//! external contract: stored sessions must survive upgrades.
//!
//! The jar is the one piece of mutable shared state touched by concurrent
//! catalog calls, so every read-modify-write happens under its mutex.
//! Merges are last-writer-wins per (domain, path, name).

use crate::{Error, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use url::Url;

const FILE_HEADER: &str = "# Netscape HTTP Cookie File";

#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix expiry timestamp; 0 marks a session cookie, kept until cleared.
    pub expires: i64,
    pub name: String,
    pub value: String,
}

impl Cookie {
    fn matches(&self, host: &str, path: &str, now: i64) -> bool {
        if self.expires != 0 && self.expires < now {
            return false;
        }
        let domain = self.domain.trim_start_matches('.');
        let domain_ok = host == domain
            || ((self.include_subdomains || self.domain.starts_with('.'))
                && host.ends_with(&format!(".{}", domain)));
        let path_ok = path.starts_with(&self.path);
        domain_ok && path_ok
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.domain == other.domain && self.path == other.path && self.name == other.name
    }
}

pub struct CookieJar {
    path: PathBuf,
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    /// Open the jar, loading any previously persisted cookies.
    ///
    /// Unreadable lines are skipped; a wholly corrupt file starts the jar
    /// fresh rather than failing the session.
    pub fn open(path: PathBuf) -> Self {
        let cookies = match fs::read_to_string(&path) {
            Ok(text) => parse_cookie_file(&text),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            cookies: Mutex::new(cookies),
        }
    }

    /// Build the `Cookie` header value for a request, if any cookies apply.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let path = if url.path().is_empty() { "/" } else { url.path() };
        let now = Utc::now().timestamp();

        let cookies = self.cookies.lock().expect("cookie jar lock poisoned");
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| c.matches(host, path, now))
            .filter(|c| !c.secure || url.scheme() == "https" || is_loopback(host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Merge `Set-Cookie` response values back into the jar and persist.
    pub fn absorb(&self, url: &Url, set_cookie_values: &[String]) -> Result<()> {
        if set_cookie_values.is_empty() {
            return Ok(());
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::Protocol(format!("cookie response without host: {}", url)))?;
        let now = Utc::now().timestamp();

        let mut cookies = self.cookies.lock().expect("cookie jar lock poisoned");
        for raw in set_cookie_values {
            let Some(cookie) = parse_set_cookie(raw, host) else {
                continue;
            };
            cookies.retain(|c| !c.same_slot(&cookie));
            // An already expired cookie is a deletion order from the server.
            if cookie.expires == 0 || cookie.expires >= now {
                cookies.push(cookie);
            }
        }
        self.save_locked(&cookies)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.lock().expect("cookie jar lock poisoned").is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        let mut cookies = self.cookies.lock().expect("cookie jar lock poisoned");
        cookies.clear();
        self.save_locked(&cookies)
    }

    fn save_locked(&self, cookies: &[Cookie]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create data dir: {}", e)))?;
        }

        let mut out = String::from(FILE_HEADER);
        out.push('\n');
        for c in cookies {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                c.domain,
                if c.include_subdomains { "TRUE" } else { "FALSE" },
                c.path,
                if c.secure { "TRUE" } else { "FALSE" },
                c.expires,
                c.name,
                c.value
            ));
        }
        fs::write(&self.path, out)
            .map_err(|e| Error::Storage(format!("failed to write cookie jar: {}", e)))?;
        Ok(())
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}

fn parse_cookie_file(text: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for line in text.lines() {
        // Curl marks HttpOnly cookies with a prefix comment.
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            continue;
        }
        cookies.push(Cookie {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires: fields[4].parse().unwrap_or(0),
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        });
    }
    cookies
}

fn parse_set_cookie(raw: &str, request_host: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        domain: request_host.to_string(),
        include_subdomains: false,
        path: "/".to_string(),
        secure: false,
        expires: 0,
        name: name.to_string(),
        value: value.trim().to_string(),
    };

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr, ""),
        };
        if key.eq_ignore_ascii_case("domain") && !val.is_empty() {
            cookie.domain = val.trim_start_matches('.').to_string();
            cookie.include_subdomains = true;
        } else if key.eq_ignore_ascii_case("path") && !val.is_empty() {
            cookie.path = val.to_string();
        } else if key.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if key.eq_ignore_ascii_case("max-age") {
            if let Ok(seconds) = val.parse::<i64>() {
                cookie.expires = Utc::now().timestamp() + seconds;
            }
        } else if key.eq_ignore_ascii_case("expires") && cookie.expires == 0 {
            if let Ok(when) = chrono::DateTime::parse_from_rfc2822(val) {
                cookie.expires = when.timestamp();
            }
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jar(temp: &TempDir) -> CookieJar {
        CookieJar::open(temp.path().join("cookies.txt"))
    }

    #[test]
    fn test_absorb_and_attach() {
        let temp = TempDir::new().unwrap();
        let jar = jar(&temp);
        let url = Url::parse("https://buy.example.com/WebObjects/auth").unwrap();

        jar.absorb(&url, &["mz_at0=token123; Path=/; Secure".to_string()])
            .unwrap();

        let header = jar.header_for(&url).unwrap();
        assert_eq!(header, "mz_at0=token123");
    }

    #[test]
    fn test_last_writer_wins_per_slot() {
        let temp = TempDir::new().unwrap();
        let jar = jar(&temp);
        let url = Url::parse("https://buy.example.com/").unwrap();

        jar.absorb(&url, &["session=first".to_string()]).unwrap();
        jar.absorb(&url, &["session=second".to_string()]).unwrap();

        assert_eq!(jar.header_for(&url).unwrap(), "session=second");
    }

    #[test]
    fn test_domain_attribute_matches_subdomains() {
        let temp = TempDir::new().unwrap();
        let jar = jar(&temp);
        let set_url = Url::parse("https://buy.example.com/").unwrap();

        jar.absorb(&set_url, &["shared=1; Domain=example.com".to_string()])
            .unwrap();

        let other = Url::parse("https://p25-buy.example.com/download").unwrap();
        assert_eq!(jar.header_for(&other).unwrap(), "shared=1");

        let unrelated = Url::parse("https://example.org/").unwrap();
        assert!(jar.header_for(&unrelated).is_none());
    }

    #[test]
    fn test_expired_cookie_not_attached() {
        let temp = TempDir::new().unwrap();
        let jar = jar(&temp);
        let url = Url::parse("https://buy.example.com/").unwrap();

        jar.absorb(&url, &["gone=1; Max-Age=-1".to_string()]).unwrap();
        assert!(jar.header_for(&url).is_none());
    }

    #[test]
    fn test_secure_cookie_requires_https() {
        let temp = TempDir::new().unwrap();
        let jar = jar(&temp);
        let https = Url::parse("https://buy.example.com/").unwrap();
        jar.absorb(&https, &["tok=1; Secure".to_string()]).unwrap();

        let http = Url::parse("http://buy.example.com/").unwrap();
        assert!(jar.header_for(&http).is_none());
        assert!(jar.header_for(&https).is_some());
    }

    #[test]
    fn test_persists_in_netscape_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.txt");
        let url = Url::parse("https://buy.example.com/store").unwrap();

        {
            let jar = CookieJar::open(path.clone());
            jar.absorb(&url, &["mz_at_ssl=abc; Path=/; Secure".to_string()])
                .unwrap();
        }

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(FILE_HEADER));
        assert!(text.contains("buy.example.com\tFALSE\t/\tTRUE\t0\tmz_at_ssl\tabc"));

        let reloaded = CookieJar::open(path);
        assert_eq!(reloaded.header_for(&url).unwrap(), "mz_at_ssl=abc");
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.txt");
        fs::write(&path, "random garbage\nwith no tabs\n").unwrap();

        let jar = CookieJar::open(path);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_clear_empties_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.txt");
        let url = Url::parse("https://buy.example.com/").unwrap();

        let jar = CookieJar::open(path.clone());
        jar.absorb(&url, &["a=1".to_string()]).unwrap();
        jar.clear().unwrap();

        assert!(jar.is_empty());
        assert!(CookieJar::open(path).is_empty());
    }
}
