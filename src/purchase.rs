//! Free-app license acquisition
//!
//! Downloading an IPA requires a license for the app on the account. The buy
//! endpoint grants one for free items; paid items are refused up front rather
//! than risking a charge. Acquiring a license the account already holds is a
//! success, not an error, so callers can run purchase-then-download flows
//! without checking ownership first.

use crate::catalog::App;
use crate::constants::{
    CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED, FAILURE_PASSWORD_TOKEN_EXPIRED,
    FAILURE_TEMPORARILY_UNAVAILABLE, PRICING_PARAM_APPSTORE, PRICING_PARAM_ARCADE, PURCHASE_PATH,
};
use crate::http::{plist_to_string, ResponseFormat, StoreClient, StoreRequest};
use crate::session::Session;
use crate::{Config, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LicenseOutcome {
    /// A new license was granted to the account.
    Acquired,
    /// The account already held a license for this app.
    AlreadyOwned,
}

/// Acquire a license for a free app.
///
/// Tries the regular store pricing first and falls back to Arcade pricing
/// when the store reports the item temporarily unavailable, which is how it
/// answers Arcade items asked for at store pricing.
pub fn acquire_license(
    client: &StoreClient,
    session: &Session,
    config: &Config,
    app: &App,
) -> Result<LicenseOutcome> {
    if app.price > 0.0 {
        return Err(Error::PurchaseNotAllowed(format!(
            "'{}' is a paid app; only free apps can be licensed",
            if app.name.is_empty() {
                app.id.to_string()
            } else {
                app.name.clone()
            }
        )));
    }

    match buy(client, session, config, app.id, PRICING_PARAM_APPSTORE) {
        Err(Error::TemporarilyUnavailable) => {
            buy(client, session, config, app.id, PRICING_PARAM_ARCADE)
        }
        other => other,
    }
}

fn buy(
    client: &StoreClient,
    session: &Session,
    config: &Config,
    app_id: u64,
    pricing_parameters: &str,
) -> Result<LicenseOutcome> {
    let account = session.account()?;
    let guid = session.device_guid()?;

    let mut body = plist::Dictionary::new();
    body.insert(
        "appExtVrsId".to_string(),
        plist::Value::String("0".to_string()),
    );
    body.insert(
        "hasAskedToFulfillPreorder".to_string(),
        plist::Value::String("true".to_string()),
    );
    body.insert(
        "buyWithoutAuthorization".to_string(),
        plist::Value::String("true".to_string()),
    );
    body.insert(
        "hasDoneAgeCheck".to_string(),
        plist::Value::String("true".to_string()),
    );
    body.insert("guid".to_string(), plist::Value::String(guid));
    body.insert("needDiv".to_string(), plist::Value::String("0".to_string()));
    body.insert(
        "origPage".to_string(),
        plist::Value::String(format!("Software-{}", app_id)),
    );
    body.insert(
        "origPageLocation".to_string(),
        plist::Value::String("Buy".to_string()),
    );
    body.insert("price".to_string(), plist::Value::String("0".to_string()));
    body.insert(
        "pricingParameters".to_string(),
        plist::Value::String(pricing_parameters.to_string()),
    );
    body.insert(
        "productType".to_string(),
        plist::Value::String("C".to_string()),
    );
    body.insert(
        "salableAdamId".to_string(),
        plist::Value::String(app_id.to_string()),
    );

    let url = format!("{}{}", config.endpoints.store_url, PURCHASE_PATH);
    let request = StoreRequest::post(url, body, ResponseFormat::Plist)
        .header("iCloud-DSID", &account.directory_services_id)
        .header("X-Dsid", &account.directory_services_id)
        .header("X-Apple-Store-Front", &account.store_front)
        .header("X-Token", &account.password_token);

    let response = client.send(request)?;
    let failure = response.failure_type();
    let message = response.customer_message();

    if failure == FAILURE_TEMPORARILY_UNAVAILABLE {
        return Err(Error::TemporarilyUnavailable);
    }
    if message == CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED {
        return Err(Error::SubscriptionRequired);
    }
    if failure == FAILURE_PASSWORD_TOKEN_EXPIRED {
        session.invalidate()?;
        return Err(Error::TokenExpired);
    }
    if !failure.is_empty() {
        if message.is_empty() {
            return Err(Error::Other(format!(
                "license acquisition failed (failureType {})",
                failure
            )));
        }
        return Err(Error::Other(message));
    }

    // The store answers a buy of an already licensed item with a plain 500.
    if response.status == 500 {
        return Ok(LicenseOutcome::AlreadyOwned);
    }

    let dict = response.dict()?;
    let doc_type = dict
        .get("jingleDocType")
        .map(plist_to_string)
        .unwrap_or_default();
    let status = dict.get("status").map(plist_to_string).unwrap_or_default();

    if doc_type == "purchaseSuccess" && status == "0" {
        return Ok(LicenseOutcome::Acquired);
    }

    Err(Error::Protocol(format!(
        "unexpected purchase response (docType '{}', status '{}')",
        doc_type, status
    )))
}
