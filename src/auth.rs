//! Apple ID authentication
//!
//! The authenticate endpoint takes a plist body wrapped in a form-urlencoded
//! content type and answers with a plist. Redirects between store pods must
//! re-POST the full body, so the flow drives them by hand. Two-factor auth is
//! stateless from the client's point of view: a login without a code comes
//! back as a challenge, and the caller retries with `password` plus the
//! device code in a brand new call.

use crate::constants::{
    AUTH_PATH, CUSTOMER_MESSAGE_ACCOUNT_DISABLED, CUSTOMER_MESSAGE_BAD_LOGIN,
    FAILURE_INVALID_CREDENTIALS, STOREFRONT_HEADER,
};
use crate::http::{plist_to_string, ResponseFormat, StoreClient, StoreRequest};
use crate::session::{Account, Session};
use crate::{Config, Error, Result};

const MAX_ATTEMPTS: u32 = 4;

/// What a login call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Signed in; the account has been installed into the session.
    Authenticated(Account),
    /// The account has two-factor authentication enabled and no code was
    /// supplied. Obtain a device code and call `login` again with it.
    VerificationRequired { prompt: String },
}

/// Sign in with an Apple ID.
///
/// `auth_code` is the two-factor device code, if the caller already has one;
/// whitespace inside it is ignored, since codes are often pasted with spaces.
/// On success the session holds the new account and its cookies.
pub fn login(
    client: &StoreClient,
    session: &Session,
    config: &Config,
    email: &str,
    password: &str,
    auth_code: Option<&str>,
) -> Result<LoginOutcome> {
    let guid = session.device_guid()?;
    let code: String = auth_code
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut url = format!("{}{}?guid={}", config.endpoints.store_url, AUTH_PATH, guid);

    for attempt in 1..=MAX_ATTEMPTS {
        let mut body = plist::Dictionary::new();
        body.insert("appleId".to_string(), plist::Value::String(email.to_string()));
        body.insert(
            "attempt".to_string(),
            plist::Value::String(attempt.to_string()),
        );
        body.insert("guid".to_string(), plist::Value::String(guid.clone()));
        body.insert(
            "password".to_string(),
            plist::Value::String(format!("{}{}", password, code)),
        );
        body.insert("rmp".to_string(), plist::Value::String("0".to_string()));
        body.insert("why".to_string(), plist::Value::String("signIn".to_string()));

        let mut request = StoreRequest::post(url.clone(), body, ResponseFormat::Plist);
        request.content_type = Some("application/x-www-form-urlencoded");
        request.follow_redirects = false;

        let response = client.send(request)?;

        // Pod redirects must re-POST the credentials at the new location.
        if response.is_redirect() {
            match response.header("location") {
                Some(location) => {
                    url = location;
                    continue;
                }
                None => {
                    return Err(Error::Protocol(
                        "authentication redirect without a location".to_string(),
                    ))
                }
            }
        }

        let failure = response.failure_type();
        let message = response.customer_message();

        // The first attempt routinely bounces with a credentials failure
        // while the store settles on a pod; only later attempts mean it.
        if attempt == 1 && failure == FAILURE_INVALID_CREDENTIALS {
            continue;
        }

        if !failure.is_empty() {
            if failure == FAILURE_INVALID_CREDENTIALS {
                return Err(Error::InvalidCredentials);
            }
            if message.is_empty() {
                return Err(Error::Other(format!(
                    "authentication failed (failureType {})",
                    failure
                )));
            }
            return Err(Error::Other(message));
        }

        if code.is_empty() && message == CUSTOMER_MESSAGE_BAD_LOGIN {
            return Ok(LoginOutcome::VerificationRequired {
                prompt: "enter the verification code sent to your trusted device".to_string(),
            });
        }
        if message == CUSTOMER_MESSAGE_ACCOUNT_DISABLED {
            return Err(Error::Other("this Apple ID has been disabled".to_string()));
        }

        let dict = response.dict()?;
        let token = dict
            .get("passwordToken")
            .map(plist_to_string)
            .unwrap_or_default();
        let ds_id = dict
            .get("dsPersonId")
            .map(plist_to_string)
            .unwrap_or_default();
        let store_front = response.header(STOREFRONT_HEADER).unwrap_or_default();

        if response.status != 200 || token.is_empty() || ds_id.is_empty() || store_front.is_empty()
        {
            return Err(Error::Protocol(format!(
                "incomplete authentication response (status {})",
                response.status
            )));
        }

        let account_info = dict.get("accountInfo").and_then(|v| v.as_dictionary());
        let account = Account {
            email: account_info
                .and_then(|info| info.get("appleId"))
                .and_then(|v| v.as_string())
                .unwrap_or(email)
                .to_string(),
            name: account_name(account_info),
            password_token: token,
            directory_services_id: ds_id,
            store_front,
        };

        session.set_account(account.clone())?;
        return Ok(LoginOutcome::Authenticated(account));
    }

    Err(Error::Other(
        "authentication failed after too many attempts".to_string(),
    ))
}

/// Sign out. Purely local: the store has no logout endpoint, so dropping the
/// account and cookies is both necessary and sufficient.
pub fn logout(session: &Session) -> Result<()> {
    session.invalidate()
}

fn account_name(account_info: Option<&plist::Dictionary>) -> String {
    let address = account_info
        .and_then(|info| info.get("address"))
        .and_then(|v| v.as_dictionary());
    let first = address
        .and_then(|a| a.get("firstName"))
        .and_then(|v| v.as_string())
        .unwrap_or_default();
    let last = address
        .and_then(|a| a.get("lastName"))
        .and_then(|v| v.as_string())
        .unwrap_or_default();
    format!("{} {}", first, last).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(first: &str, last: &str) -> plist::Dictionary {
        let mut address = plist::Dictionary::new();
        address.insert(
            "firstName".to_string(),
            plist::Value::String(first.to_string()),
        );
        address.insert(
            "lastName".to_string(),
            plist::Value::String(last.to_string()),
        );
        let mut info = plist::Dictionary::new();
        info.insert("address".to_string(), plist::Value::Dictionary(address));
        info
    }

    #[test]
    fn test_account_name_joins_parts() {
        assert_eq!(account_name(Some(&info("Jane", "Doe"))), "Jane Doe");
        assert_eq!(account_name(Some(&info("Jane", ""))), "Jane");
        assert_eq!(account_name(None), "");
    }
}
