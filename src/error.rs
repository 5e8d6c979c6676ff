//! A dedicated error for all possible failures: I/O, DNS packet inconsistencies, TLS, HTTP framing
use std::fmt;
use std::io;
use std::str;

use openssl::error::ErrorStack;

/// Verdicts of the packet linter. The display strings are stable and are the
/// ones logged when an upstream reply is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintError {
    InvalidHeader,
    InvalidDomain,
    InvalidClass,
    NxDomain,
    MultipleQuestions,
    InvalidPktLen,
}

impl LintError {
    pub fn as_str(&self) -> &'static str {
        match self {
            LintError::InvalidHeader => "invalid header",
            LintError::InvalidDomain => "invalid domain",
            LintError::InvalidClass => "invalid class",
            LintError::NxDomain => "nxdomain",
            LintError::MultipleQuestions => "multiple questions",
            LintError::InvalidPktLen => "invalid packet length",
        }
    }
}

impl fmt::Display for LintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum DnsError {
    Io(io::Error),
    Utf8(str::Utf8Error),
    Ssl(ErrorStack),
    Tls(String),
    Lint(LintError),
    Http(String),
    Config(String),
}

/// A specific custom `Result` for all functions
pub type DnsResult<T> = Result<T, DnsError>;

impl DnsError {
    // Helper function to create a configuration error from a string
    pub fn config(s: &str) -> Self {
        DnsError::Config(String::from(s))
    }
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::Io(e) => write!(f, "i/o error: {}", e),
            DnsError::Utf8(e) => write!(f, "utf8 error: {}", e),
            DnsError::Ssl(e) => write!(f, "ssl error: {}", e),
            DnsError::Tls(e) => write!(f, "tls error: {}", e),
            DnsError::Lint(e) => write!(f, "{}", e),
            DnsError::Http(e) => write!(f, "http error: {}", e),
            DnsError::Config(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl std::error::Error for DnsError {}

// All conversions from internal errors to DnsError
impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        DnsError::Io(err)
    }
}

impl From<str::Utf8Error> for DnsError {
    fn from(err: str::Utf8Error) -> Self {
        DnsError::Utf8(err)
    }
}

impl From<ErrorStack> for DnsError {
    fn from(err: ErrorStack) -> Self {
        DnsError::Ssl(err)
    }
}

impl From<LintError> for DnsError {
    fn from(err: LintError) -> Self {
        DnsError::Lint(err)
    }
}
