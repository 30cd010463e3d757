//! Process identity and the user-agent string built from it.
//!
//! The identity is read once, when a dispatcher is created. A provider that
//! fails does not stop the dispatcher from loading: the built-in defaults
//! are used instead.

use tracing::warn;

use crate::Result;

/// Crate version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version reported when the application version cannot be determined.
pub const DEFAULT_APP_VERSION: &str = "0.0.1";

/// User agent used before a dispatcher is loaded, or when the identity
/// provider fails.
pub const DEFAULT_USER_AGENT: &str = "Courier/0.0.1 (Rust)";

/// Name used when the builder is not given one.
pub const DEFAULT_APP_NAME: &str = "Courier";

/// Descriptors the user-agent string is assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub app_name: String,
    pub app_version: String,
    /// Hardware/OS description, e.g. `linux x86_64 unix`.
    pub device: String,
    /// Platform release, e.g. the runtime or OS version.
    pub release: String,
}

impl ProcessIdentity {
    /// `"<app>/<version> (<device>; <release>; )"`
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} ({}; {}; )",
            self.app_name, self.app_version, self.device, self.release
        )
    }
}

/// Supplies the process identity at load time.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self, app_name: &str) -> Result<ProcessIdentity>;
}

/// Identity from the compile-time target and the crate version.
#[derive(Debug, Clone, Default)]
pub struct SystemIdentity {
    app_version: Option<String>,
}

impl SystemIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this application version instead of the crate's.
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }
}

impl IdentityProvider for SystemIdentity {
    fn identity(&self, app_name: &str) -> Result<ProcessIdentity> {
        use std::env::consts::{ARCH, FAMILY, OS};

        Ok(ProcessIdentity {
            app_name: app_name.to_string(),
            app_version: self
                .app_version
                .clone()
                .unwrap_or_else(|| PKG_VERSION.to_string()),
            device: format!("{OS} {ARCH} {FAMILY}"),
            release: format!("courier {PKG_VERSION}"),
        })
    }
}

/// A fixed identity, for embedders that know better than the target triple.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub ProcessIdentity);

impl IdentityProvider for StaticIdentity {
    fn identity(&self, _app_name: &str) -> Result<ProcessIdentity> {
        Ok(self.0.clone())
    }
}

/// Resolved identity: `(app_version, user_agent)`.
///
/// Falls back to [`DEFAULT_APP_VERSION`] and [`DEFAULT_USER_AGENT`] if the
/// provider fails.
pub(crate) fn resolve(provider: &dyn IdentityProvider, app_name: &str) -> (String, String) {
    match provider.identity(app_name) {
        Ok(identity) => (identity.app_version.clone(), identity.user_agent()),
        Err(e) => {
            warn!(app_name, error = %e, "identity provider failed, using defaults");
            (
                DEFAULT_APP_VERSION.to_string(),
                DEFAULT_USER_AGENT.to_string(),
            )
        }
    }
}
