//! Protocol constants for Apple's public and private App Store endpoints.
//!
//! The failure-code and customer-message sentinels are opaque values defined
//! by the remote service and may change without notice; they are defined here
//! once and never inlined at call sites.

/// Public iTunes API host (search and lookup).
pub const ITUNES_API_URL: &str = "https://itunes.apple.com";

/// Private store host (authentication and purchase).
pub const PRIVATE_STORE_URL: &str = "https://buy.itunes.apple.com";

/// Private store host used for download-grant resolution. The `p25` prefix
/// selects the content-delivery pod.
pub const PRIVATE_DOWNLOAD_URL: &str = "https://p25-buy.itunes.apple.com";

pub const SEARCH_PATH: &str = "/search";
pub const LOOKUP_PATH: &str = "/lookup";
pub const AUTH_PATH: &str = "/WebObjects/MZFinance.woa/wa/authenticate";
pub const PURCHASE_PATH: &str = "/WebObjects/MZBuy.woa/wa/buyProduct";
pub const DOWNLOAD_PATH: &str = "/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct";

/// Response header carrying the account's storefront identifier.
pub const STOREFRONT_HEADER: &str = "x-set-apple-store-front";

/// The store rejects requests that do not present a Configurator user agent.
pub const DEFAULT_USER_AGENT: &str =
    "Configurator/2.15 (Macintosh; OS X 10.15.6; 16G29) AppleWebKit/2603.3.8";

/// `failureType` values returned by the private endpoints.
pub const FAILURE_INVALID_CREDENTIALS: &str = "-5000";
pub const FAILURE_PASSWORD_TOKEN_EXPIRED: &str = "2034";
pub const FAILURE_LICENSE_NOT_FOUND: &str = "9610";
pub const FAILURE_TEMPORARILY_UNAVAILABLE: &str = "2059";

/// `customerMessage` values that change control flow.
pub const CUSTOMER_MESSAGE_BAD_LOGIN: &str = "MZFinance.BadLogin.Configurator_message";
pub const CUSTOMER_MESSAGE_ACCOUNT_DISABLED: &str = "MZFinance.DisabledAccount.Message";
pub const CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED: &str = "Subscription Required";

/// Pricing parameters accepted by the purchase endpoint. Regular store items
/// use `STDQ`; Apple Arcade items only accept `GAME`.
pub const PRICING_PARAM_APPSTORE: &str = "STDQ";
pub const PRICING_PARAM_ARCADE: &str = "GAME";

/// Storefront prefix → ISO country code.
///
/// The storefront header looks like `143441-1,29`; the part before the dash
/// identifies the country catalog.
pub const STORE_FRONTS: &[(&str, &str)] = &[
    ("143441", "US"),
    ("143442", "FR"),
    ("143443", "DE"),
    ("143444", "GB"),
    ("143445", "AT"),
    ("143446", "BE"),
    ("143447", "FI"),
    ("143448", "GR"),
    ("143449", "IE"),
    ("143450", "IT"),
    ("143451", "LU"),
    ("143452", "NL"),
    ("143453", "PT"),
    ("143454", "ES"),
    ("143455", "CA"),
    ("143456", "SE"),
    ("143457", "NO"),
    ("143458", "DK"),
    ("143459", "CH"),
    ("143460", "AU"),
    ("143461", "NZ"),
    ("143462", "JP"),
    ("143463", "HK"),
    ("143464", "SG"),
    ("143465", "CN"),
    ("143466", "KR"),
    ("143467", "IN"),
    ("143468", "MX"),
    ("143469", "RU"),
    ("143470", "TW"),
    ("143471", "VN"),
    ("143472", "ZA"),
    ("143473", "MY"),
    ("143474", "PH"),
    ("143475", "TH"),
    ("143476", "ID"),
    ("143477", "PK"),
    ("143478", "PL"),
    ("143479", "SA"),
    ("143480", "TR"),
    ("143481", "AE"),
    ("143482", "HU"),
    ("143483", "CL"),
    ("143487", "RO"),
    ("143489", "CZ"),
    ("143491", "IL"),
    ("143494", "HR"),
    ("143496", "SK"),
    ("143499", "SI"),
    ("143501", "CO"),
    ("143502", "VE"),
    ("143503", "BR"),
    ("143505", "AR"),
];

/// Map a storefront header value to its ISO country code.
pub fn country_for_storefront(store_front: &str) -> Option<&'static str> {
    let prefix = store_front.split('-').next()?;
    STORE_FRONTS
        .iter()
        .find(|(code, _)| *code == prefix)
        .map(|(_, country)| *country)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_for_storefront_with_suffix() {
        assert_eq!(country_for_storefront("143441-1,29"), Some("US"));
        assert_eq!(country_for_storefront("143444-2,32"), Some("GB"));
    }

    #[test]
    fn test_country_for_storefront_bare_prefix() {
        assert_eq!(country_for_storefront("143462"), Some("JP"));
    }

    #[test]
    fn test_country_for_storefront_unknown() {
        assert_eq!(country_for_storefront("999999-1"), None);
        assert_eq!(country_for_storefront(""), None);
    }
}
