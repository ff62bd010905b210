//! Invocation of the external package manager.
//!
//! The session shells out to `uv` to extend its package set at runtime. The
//! identifier allow-list runs before anything is spawned; it is the only
//! defense between tool arguments and the command line, so it stays strict.

use std::{process::Command, sync::OnceLock};

use regex::Regex;

use crate::error::InstallError;

/// Allow-list for package identifiers: alphanumeric first character, then
/// letters, digits, dot, underscore, or hyphen. Everything else — shell
/// metacharacters included — is rejected.
const PACKAGE_NAME_PATTERN: &str = "^[A-Za-z0-9][A-Za-z0-9._-]*$";

static PACKAGE_NAME: OnceLock<Regex> = OnceLock::new();

pub(crate) fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME
        .get_or_init(|| Regex::new(PACKAGE_NAME_PATTERN).expect("valid package name pattern"))
        .is_match(name)
}

/// Strips an extras suffix (`name[extra]`) down to the importable base name.
pub(crate) fn base_module(package: &str) -> &str {
    package.split('[').next().unwrap_or(package)
}

/// Handle on the package manager binary.
///
/// Defaults to `uv` on `PATH`; the server binary can point it elsewhere via
/// configuration.
#[derive(Debug, Clone)]
pub struct Installer {
    uv_bin: String,
}

impl Default for Installer {
    fn default() -> Self {
        Self::new("uv")
    }
}

impl Installer {
    #[must_use]
    pub fn new(uv_bin: impl Into<String>) -> Self {
        Self {
            uv_bin: uv_bin.into(),
        }
    }

    /// Ensures the package manager's own tooling is present.
    pub(crate) fn bootstrap(&self) -> Result<(), InstallError> {
        tracing::debug!(uv_bin = %self.uv_bin, "bootstrapping package manager");
        self.run(&["pip", "install", "pip"])
            .map_err(InstallError::Bootstrap)?;
        Ok(())
    }

    /// Installs the exact identifier string (extras suffix passes through).
    pub(crate) fn install(&self, package: &str) -> Result<(), InstallError> {
        tracing::info!(package, "installing package");
        self.run(&["pip", "install", package])
            .map_err(InstallError::Install)?;
        Ok(())
    }

    /// Runs the binary with `args`. Spawn failures and non-zero exits both
    /// surface as the message (stderr where available) for callers to wrap.
    fn run(&self, args: &[&str]) -> Result<(), String> {
        let output = Command::new(&self.uv_bin)
            .args(args)
            .output()
            .map_err(|err| err.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).into_owned());
        }
        Ok(())
    }
}
