use std::fmt;

use pyo3::{PyErr, Python, prelude::*, types::PyModule};

/// Error type for session execution, separating failures by origin.
///
/// `Python` failures are user-facing data (the submitted snippet raised) and
/// are rendered into an error envelope by callers; `Engine` failures mean the
/// interpreter plumbing itself broke and should surface as protocol errors.
#[derive(Debug, Clone)]
pub enum ReplError {
    /// Submitted code, or its trailing expression, raised an exception.
    /// Carries the formatted Python traceback.
    Python(String),
    /// Capture or namespace plumbing failed outside user code.
    Engine(String),
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python(trace) => write!(f, "{trace}"),
            Self::Engine(msg) => write!(f, "engine error: {msg}"),
        }
    }
}

impl std::error::Error for ReplError {}

/// Error type for package installation, one variant per pipeline stage.
///
/// The stages stay distinct so callers can report which step failed instead
/// of collapsing everything into one generic message.
#[derive(Debug, Clone)]
pub enum InstallError {
    /// The identifier failed the allow-list check; nothing was spawned.
    InvalidName(String),
    /// The package manager could not be bootstrapped; carries its stderr.
    Bootstrap(String),
    /// The install command failed; carries its stderr.
    Install(String),
    /// The package installed but the base module could not be imported.
    Import(String),
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "Invalid package name: {name}"),
            Self::Bootstrap(stderr) => write!(f, "Failed to install pip: {stderr}"),
            Self::Install(stderr) => write!(f, "Failed to install package:\n{stderr}"),
            Self::Import(msg) => write!(f, "Package installed but import failed: {msg}"),
        }
    }
}

impl std::error::Error for InstallError {}

/// Renders a Python exception as a full traceback string.
///
/// Falls back to the exception's display form when the `traceback` module
/// itself cannot be driven (a broken interpreter should still produce
/// something readable).
pub(crate) fn format_traceback(py: Python<'_>, err: &PyErr) -> String {
    let render = || -> PyResult<String> {
        let traceback = PyModule::import(py, "traceback")?;
        let lines: Vec<String> = traceback
            .getattr("format_exception")?
            .call1((err.value(py),))?
            .extract()?;
        Ok(lines.concat())
    };
    render().unwrap_or_else(|_| err.to_string())
}
