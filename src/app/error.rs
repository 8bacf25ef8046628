use thiserror::Error;

#[derive(Error, Debug)]
pub enum TickerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status for {url}: {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Unexpected content type for {url}: {content_type:?}")]
    ContentType { url: String, content_type: String },

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTML rewriting error: {0}")]
    Rewrite(String),

    #[error("Invalid search query: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A transaction is already in progress")]
    TxInProgress,

    #[error("There is no transaction in progress")]
    NoTxInProgress,

    #[error("Savepoint {0:?} does not exist")]
    InvalidSavepoint(String),

    #[error("Update operation does not change any values")]
    EmptyUpdate,

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Feed {0} is not active")]
    Inactive(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("{0}")]
    Other(String),
}

impl From<lol_html::errors::RewritingError> for TickerError {
    fn from(e: lol_html::errors::RewritingError) -> Self {
        TickerError::Rewrite(e.to_string())
    }
}

impl From<toml::de::Error> for TickerError {
    fn from(e: toml::de::Error) -> Self {
        TickerError::Config(e.to_string())
    }
}

impl From<crate::config::ConfigError> for TickerError {
    fn from(e: crate::config::ConfigError) -> Self {
        TickerError::Config(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for TickerError {
    fn from(e: rusqlite_migration::Error) -> Self {
        TickerError::Migration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TickerError>;
