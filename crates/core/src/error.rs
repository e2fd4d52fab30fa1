use crate::backend::CatalogKind;

/// Errors reported by a generation backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The request never got a response (network, DNS, TLS, ...).
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-2xx status.
    #[error("backend API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The backend answered with something we could not decode.
    #[error("invalid backend response: {0}")]
    Decode(String),

    /// The job handle is not (or no longer) tracked by the backend client.
    #[error("unknown job {0}")]
    UnknownJob(u64),
}

/// Errors produced while turning chat text into a job specification.
///
/// Display strings are shown to the user verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("{0} is missing value")]
    MissingValue(String),

    #[error("invalid {0}")]
    InvalidValue(&'static str),

    #[error("parameters must follow the prompt text")]
    ParamsAfterPrompt,

    #[error("invalid {}: {value}", kind.singular())]
    NotInCatalog { kind: CatalogKind, value: String },

    #[error("error getting {kind}: {source}")]
    Catalog {
        kind: CatalogKind,
        #[source]
        source: BackendError,
    },

    #[error("missing prompt")]
    MissingPrompt,
}
