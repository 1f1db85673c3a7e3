use core::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("view state read before the landing page was parsed")]
    UninitializedState,
    #[error("no javax.faces.ViewState input on the landing page")]
    MissingViewState,
    #[error("no form with an id owns the view state")]
    MissingForm,
    #[error("dropdown {field:?} not present in response")]
    OptionParse { field: CompactString },
    #[error("no update for {wanted:?} (response carried {found:?})")]
    FragmentNotFound {
        wanted: Vec<CompactString>,
        found: Vec<CompactString>,
    },
    #[error("not a partial response: {snippet:?}")]
    NotPartial { snippet: String },
    #[error("malformed partial response: {0}")]
    Malformed(&'static str),
    #[error("server error {name}: {message}")]
    Server { name: String, message: String },
    /// The server no longer knows the view; the session has to be rebuilt before resending.
    #[error("view expired: {0}")]
    ViewExpired(String),
    #[error("session redirected to {0}")]
    Redirected(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("record for {0} has fewer than three levels")]
    ShallowPath(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("cannot establish session: {0}")]
    Fatal(Box<Self>),
}

/// How the retry controller and the navigator treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Worth another attempt after a delay.
    Transient,
    /// Markup the protocol depends on is gone; resending the same request will not help.
    Structural,
    Terminal,
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Self::FragmentNotFound { .. }
            | Self::NotPartial { .. }
            | Self::Malformed(_)
            | Self::Server { .. }
            | Self::ViewExpired(_) => Kind::Transient,
            Self::Status(code) => {
                if matches!(code, 408 | 429 | 500..=599) {
                    Kind::Transient
                } else {
                    Kind::Terminal
                }
            }
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    return Self::Status(status.as_u16()).kind();
                }
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
                    Kind::Transient
                } else {
                    Kind::Terminal
                }
            }
            Self::MissingViewState | Self::MissingForm | Self::OptionParse { .. } => Kind::Structural,
            Self::UninitializedState
            | Self::Redirected(_)
            | Self::ShallowPath(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Fatal(_) => Kind::Terminal,
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind() == Kind::Transient
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Structural => "structural",
            Self::Terminal => "terminal",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(Error::Status(503).kind(), Kind::Transient);
        assert_eq!(Error::Status(429).kind(), Kind::Transient);
        assert_eq!(Error::Status(404).kind(), Kind::Terminal);
        assert_eq!(Error::Status(403).kind(), Kind::Terminal);
    }

    #[test]
    fn markup_drift_is_not_retried() {
        let e = Error::OptionParse { field: "xaxisVar_input".into() };
        assert_eq!(e.kind(), Kind::Structural);
        assert!(!e.is_transient());

        let e = Error::FragmentNotFound { wanted: vec!["tablePnl".into()], found: Vec::new() };
        assert!(e.is_transient());
    }
}
