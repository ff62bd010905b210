//! Scoped redirection of the interpreter's output streams.
//!
//! While a snippet runs, `sys.stdout` and `sys.stderr` point at two fresh
//! in-memory buffers; the original stream objects are restored on every exit
//! path, including unwinds, via an RAII guard. Redirection is process-global
//! state, which is why the session serializes calls (see `session`).

use pyo3::{prelude::*, types::PyModule};

/// Buffer contents plus the thunk outcome from one captured run.
pub(crate) struct Captured<T> {
    pub stdout: String,
    pub stderr: String,
    pub outcome: PyResult<T>,
}

/// Runs `thunk` with `sys.stdout`/`sys.stderr` redirected into `io.StringIO`
/// buffers and returns both captured texts alongside the thunk outcome.
///
/// The outer `PyResult` covers acquisition/teardown plumbing only; a failure
/// inside the thunk is reported through `Captured::outcome` so callers can
/// keep user errors and engine errors apart.
pub(crate) fn run_with_capture<'py, T>(
    py: Python<'py>,
    thunk: impl FnOnce() -> PyResult<T>,
) -> PyResult<Captured<T>> {
    let string_io = PyModule::import(py, "io")?.getattr("StringIO")?;
    let out_buf = string_io.call0()?;
    let err_buf = string_io.call0()?;

    let guard = RedirectGuard::acquire(py, &out_buf, &err_buf)?;
    let outcome = thunk();
    drop(guard);

    Ok(Captured {
        stdout: buffer_text(&out_buf)?,
        stderr: buffer_text(&err_buf)?,
        outcome,
    })
}

fn buffer_text(buffer: &Bound<'_, PyAny>) -> PyResult<String> {
    Ok(buffer
        .call_method0("getvalue")?
        .str()?
        .to_string_lossy()
        .into_owned())
}

/// Holds the original stream objects and swaps them back in on drop.
struct RedirectGuard<'py> {
    sys: Bound<'py, PyModule>,
    saved_stdout: Bound<'py, PyAny>,
    saved_stderr: Bound<'py, PyAny>,
}

impl<'py> RedirectGuard<'py> {
    fn acquire(
        py: Python<'py>,
        out_buf: &Bound<'py, PyAny>,
        err_buf: &Bound<'py, PyAny>,
    ) -> PyResult<Self> {
        let sys = PyModule::import(py, "sys")?;
        let saved_stdout = sys.getattr("stdout")?;
        let saved_stderr = sys.getattr("stderr")?;

        sys.setattr("stdout", out_buf)?;
        if let Err(err) = sys.setattr("stderr", err_buf) {
            // Half-acquired: put stdout back before reporting.
            let _ = sys.setattr("stdout", &saved_stdout);
            return Err(err);
        }

        Ok(Self {
            sys,
            saved_stdout,
            saved_stderr,
        })
    }
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        let _ = self.sys.setattr("stdout", &self.saved_stdout);
        let _ = self.sys.setattr("stderr", &self.saved_stderr);
    }
}
