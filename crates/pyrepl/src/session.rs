//! The persistent execution session.
//!
//! One `ReplSession` owns the global namespace that survives across tool
//! calls, analogous to a REPL's module scope. Executing a snippet mutates
//! that namespace in place; resetting replaces its contents with the seeded
//! baseline. There is exactly one logical session per process, and because
//! stream redirection (see `capture`) is process-global, every operation that
//! touches the interpreter runs under one process-wide critical section.

use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use pyo3::{
    exceptions::PySyntaxError,
    prelude::*,
    types::{PyDict, PyModule},
};

use crate::{
    capture,
    classify::{self, ResultPayload},
    error::{InstallError, ReplError, format_traceback},
    installer::{self, Installer},
};

/// Names starting with this prefix are internal and never listed.
const RESERVED_PREFIX: char = '_';
/// The slot holding the injected builtins; hidden from listings.
const BUILTINS_SLOT: &str = "__builtins__";
/// Filename attributed to submitted snippets in tracebacks.
const SOURCE_NAME: &str = "<session>";

/// Serializes all interpreter access: stream redirection is process-global,
/// so two in-flight calls would corrupt each other's buffers.
static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn session_guard() -> MutexGuard<'static, ()> {
    SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One execution request as delivered by the tool layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecuteRequest {
    /// Python source to run as a sequence of statements.
    #[serde(default)]
    pub code: String,
    /// When true, the namespace is cleared and re-seeded; no code runs.
    #[serde(default)]
    pub reset: bool,
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// The namespace was cleared and re-seeded; nothing ran.
    Reset,
    /// The snippet ran to completion.
    Completed(ExecuteOutput),
}

/// Captured output plus the classified trailing value of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutput {
    /// Text written to stdout while the snippet ran.
    pub stdout: String,
    /// Text written to stderr while the snippet ran.
    pub stderr: String,
    /// The classified value of the trailing expression.
    pub value: ResultPayload,
}

/// The stateful session: one namespace, reused call to call.
pub struct ReplSession {
    namespace: Py<PyDict>,
    installer: Installer,
}

impl ReplSession {
    /// Creates a session with a freshly seeded namespace and the default
    /// package manager.
    pub fn new() -> Result<Self, ReplError> {
        Self::with_installer(Installer::default())
    }

    /// Creates a session that installs packages through `installer`.
    pub fn with_installer(installer: Installer) -> Result<Self, ReplError> {
        let _guard = session_guard();
        let namespace = Python::attach(|py| -> PyResult<Py<PyDict>> {
            let namespace = PyDict::new(py);
            seed(py, &namespace)?;
            Ok(namespace.unbind())
        })
        .map_err(|err| ReplError::Engine(err.to_string()))?;
        Ok(Self {
            namespace,
            installer,
        })
    }

    /// Runs one execution request against the session namespace.
    ///
    /// A reset request short-circuits: the namespace is re-seeded and no
    /// code runs. Otherwise the snippet executes under output capture, the
    /// last non-empty line is re-evaluated as a standalone expression when it
    /// is one, and the value is classified for transport. Failures raised by
    /// the snippet come back as [`ReplError::Python`] with a full traceback.
    pub fn execute(&mut self, request: &ExecuteRequest) -> Result<ExecuteOutcome, ReplError> {
        let _guard = session_guard();
        Python::attach(|py| {
            if request.reset {
                self.reseed(py).map_err(engine)?;
                tracing::debug!("session reset");
                return Ok(ExecuteOutcome::Reset);
            }

            let namespace = self.namespace.bind(py);
            let run = capture::run_with_capture(py, || {
                run_statements(py, namespace, &request.code)
            })
            .map_err(engine)?;
            if let Err(err) = run.outcome {
                return Err(ReplError::Python(format_traceback(py, &err)));
            }

            // The trailing expression is re-evaluated separately, under a
            // capture of its own whose buffers are discarded: its side-effect
            // output must neither reach the transport stream nor show up
            // twice in the captured text.
            let trailing = capture::run_with_capture(py, || {
                trailing_expression(py, namespace, &request.code)
            })
            .map_err(engine)?;
            let value = match trailing.outcome {
                Ok(Some(value)) => classify::classify(py, &value)
                    .map_err(|err| ReplError::Python(format_traceback(py, &err)))?,
                Ok(None) => ResultPayload::NoExpression,
                Err(err) => return Err(ReplError::Python(format_traceback(py, &err))),
            };

            Ok(ExecuteOutcome::Completed(ExecuteOutput {
                stdout: run.stdout,
                stderr: run.stderr,
                value,
            }))
        })
    }

    /// Clears the namespace and restores the seeded baseline.
    pub fn reset(&mut self) -> Result<(), ReplError> {
        let _guard = session_guard();
        Python::attach(|py| self.reseed(py)).map_err(|err| ReplError::Engine(err.to_string()))
    }

    /// Lists visible bindings as `name -> repr`, in insertion order.
    ///
    /// Reserved names (leading underscore) and the builtins slot are
    /// excluded. A failing `__repr__` degrades to a placeholder instead of
    /// failing the listing.
    #[must_use]
    pub fn list_variables(&self) -> IndexMap<String, String> {
        let _guard = session_guard();
        Python::attach(|py| {
            let mut variables = IndexMap::new();
            for (key, value) in self.namespace.bind(py).iter() {
                // Only identifier-shaped (string) keys count as variables.
                let Ok(name) = key.extract::<String>() else {
                    continue;
                };
                if name.starts_with(RESERVED_PREFIX) || name == BUILTINS_SLOT {
                    continue;
                }
                variables.insert(name, defensive_repr(&value));
            }
            variables
        })
    }

    /// Installs `package` and imports its base module into the namespace.
    ///
    /// Stages, each with its own failure variant: allow-list validation,
    /// package manager bootstrap, the install itself, then the import that
    /// makes the package usable in subsequent calls without a reset.
    pub fn install_package(&mut self, package: &str) -> Result<String, InstallError> {
        if !installer::is_valid_package_name(package) {
            return Err(InstallError::InvalidName(package.to_owned()));
        }

        let _guard = session_guard();
        self.installer.bootstrap()?;
        self.installer.install(package)?;

        let module_name = installer::base_module(package);
        Python::attach(|py| {
            let module = PyModule::import(py, module_name)
                .map_err(|err| InstallError::Import(err.to_string()))?;
            self.namespace
                .bind(py)
                .set_item(module_name, module)
                .map_err(|err| InstallError::Import(err.to_string()))
        })?;

        tracing::info!(package, "installed and imported package");
        Ok(format!("Successfully installed and imported {package}"))
    }

    fn reseed(&self, py: Python<'_>) -> PyResult<()> {
        let namespace = self.namespace.bind(py);
        namespace.call_method0("clear")?;
        seed(py, namespace)
    }
}

fn engine(err: PyErr) -> ReplError {
    ReplError::Engine(err.to_string())
}

/// Seeds a namespace with the fixed capability set: builtins, plus the `pd`
/// alias when pandas is importable in the host interpreter. The alias is
/// best-effort; `install_package("pandas")` can add it later.
fn seed(py: Python<'_>, namespace: &Bound<'_, PyDict>) -> PyResult<()> {
    namespace.set_item(BUILTINS_SLOT, PyModule::import(py, "builtins")?)?;
    if let Ok(pandas) = PyModule::import(py, "pandas") {
        configure_pandas_display(py, &pandas)?;
        namespace.set_item("pd", pandas)?;
    }
    Ok(())
}

/// Widens pandas display limits so reprs of larger frames are not elided.
fn configure_pandas_display(py: Python<'_>, pandas: &Bound<'_, PyModule>) -> PyResult<()> {
    let set_option = pandas.getattr("set_option")?;
    set_option.call1(("display.max_colwidth", py.None()))?;
    set_option.call1(("display.max_rows", py.None()))?;
    set_option.call1(("display.width", 1000))?;
    Ok(())
}

/// Compiles and runs `code` in `exec` mode against `namespace`.
fn run_statements(py: Python<'_>, namespace: &Bound<'_, PyDict>, code: &str) -> PyResult<()> {
    let builtins = PyModule::import(py, "builtins")?;
    let compiled = builtins
        .getattr("compile")?
        .call1((code, SOURCE_NAME, "exec"))?;
    builtins.getattr("eval")?.call1((compiled, namespace))?;
    Ok(())
}

/// Re-evaluates the last non-empty line as a standalone expression.
///
/// Returns `Ok(None)` when the line does not compile in `eval` mode — an
/// assignment, a control-flow header, or an indented tail of a compound
/// statement is not the session's value. A runtime failure during an
/// evaluation that did compile propagates and fails the call.
fn trailing_expression<'py>(
    py: Python<'py>,
    namespace: &Bound<'py, PyDict>,
    code: &str,
) -> PyResult<Option<Bound<'py, PyAny>>> {
    let Some(line) = last_nonempty_line(code) else {
        return Ok(None);
    };
    let builtins = PyModule::import(py, "builtins")?;
    let compiled = match builtins.getattr("compile")?.call1((line, SOURCE_NAME, "eval")) {
        Ok(compiled) => compiled,
        Err(err) if err.is_instance_of::<PySyntaxError>(py) => return Ok(None),
        Err(err) => return Err(err),
    };
    builtins.getattr("eval")?.call1((compiled, namespace)).map(Some)
}

/// Last line with any non-whitespace content, with trailing whitespace
/// removed. Leading indentation is kept: an indented line belongs to a
/// compound statement and must not evaluate on its own.
fn last_nonempty_line(code: &str) -> Option<&str> {
    code.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(str::trim_end)
}

fn defensive_repr(value: &Bound<'_, PyAny>) -> String {
    match classify::repr_string(value) {
        Ok(repr) => repr,
        Err(_) => {
            let type_name = value
                .get_type()
                .name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "object".to_owned());
            format!("<unrepresentable {type_name}>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::last_nonempty_line;

    #[test]
    fn last_nonempty_line_skips_blank_tails() {
        assert_eq!(last_nonempty_line("x + 1\n\n  \n"), Some("x + 1"));
        assert_eq!(last_nonempty_line("a = 1\nb = 2"), Some("b = 2"));
        assert_eq!(last_nonempty_line("   \n\t\n"), None);
        assert_eq!(last_nonempty_line(""), None);
    }

    #[test]
    fn last_nonempty_line_keeps_indentation() {
        assert_eq!(
            last_nonempty_line("for i in range(3):\n    print(i)\n"),
            Some("    print(i)")
        );
    }
}
