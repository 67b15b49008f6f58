use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid Apple ID or password")]
    InvalidCredentials,

    #[error("verification code required: {0}")]
    VerificationRequired(String),

    #[error("password token expired; sign in again")]
    TokenExpired,

    #[error("a license for this app is required; acquire it first")]
    LicenseRequired,

    #[error("purchase not allowed: {0}")]
    PurchaseNotAllowed(String),

    #[error("item temporarily unavailable")]
    TemporarilyUnavailable,

    #[error("an active subscription is required for this item")]
    SubscriptionRequired,

    #[error("not signed in")]
    NotSignedIn,

    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unexpected response from the store: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-checkable identifier for each error kind.
    ///
    /// Callers drive retries and UI flows off this identifier, never off the
    /// human-readable message text.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) | Error::TomlDe(_) | Error::TomlSer(_) => "serialization_error",
            Error::Http(_) => "network_error",
            Error::Plist(_) | Error::Zip(_) => "format_error",
            Error::InvalidCredentials => "invalid_credentials",
            Error::VerificationRequired(_) => "verification_required",
            Error::TokenExpired => "token_expired",
            Error::LicenseRequired => "license_required",
            Error::PurchaseNotAllowed(_) => "purchase_not_allowed",
            Error::TemporarilyUnavailable => "temporarily_unavailable",
            Error::SubscriptionRequired => "subscription_required",
            Error::NotSignedIn => "not_signed_in",
            Error::AppNotFound(_) => "app_not_found",
            Error::Cancelled => "cancelled",
            Error::Storage(_) => "storage_error",
            Error::Protocol(_) => "protocol_error",
            Error::Other(_) => "error",
        }
    }

    /// Whether retrying the same call with identical inputs can succeed.
    ///
    /// Only transport-level failures qualify; a stale token or rejected
    /// credentials would just loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_))
    }
}
