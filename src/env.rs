//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `GEEKMARKS_ENV` environment variable.
//!
//! Set `GEEKMARKS_ENV` to one of:
//! - `test` - Test mode (credentials go to a file instead of the OS keyring)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the hub and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment (local server, usually `localhost:4000`).
    Development,
    /// Test environment - file storage instead of the keyring.
    Test,
}

impl Environment {
    /// Detect current environment from `GEEKMARKS_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("GEEKMARKS_ENV").as_deref() {
            Ok("test") => Self::Test,
            Ok("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}
