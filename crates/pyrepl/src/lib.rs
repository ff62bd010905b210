//! A persistent Python execution session for tool-call servers.
//!
//! The crate embeds CPython in-process and keeps one global namespace alive
//! across calls: snippets execute against it, their textual side effects are
//! captured, the value of the trailing expression is classified into a
//! transport-safe payload, and the available package set can be extended at
//! runtime through the external package manager.
//!
//! [`ReplSession`] is the entry point; the MCP surface lives in the sibling
//! `pyrepl-mcp` crate.

mod capture;
mod classify;
mod error;
mod installer;
mod session;

pub use crate::{
    classify::{DataframePayload, ResultPayload},
    error::{InstallError, ReplError},
    installer::Installer,
    session::{ExecuteOutcome, ExecuteOutput, ExecuteRequest, ReplSession},
};
