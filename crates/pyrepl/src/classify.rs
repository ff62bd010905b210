//! Classification of a call's trailing value into a transport-safe payload.
//!
//! One level of type dispatch: tabular data gets its own envelope shape,
//! plain `list`/`dict` values stay structured, everything else is rendered
//! with `repr()`. Nested values are converted to JSON with a `repr()`
//! fallback leaf so one odd element cannot fail the whole call.

use pyo3::{
    prelude::*,
    types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyModule, PyString, PyTuple},
};
use serde_json::{Map, Value};

/// The classified value of the trailing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    /// The trailing value is tabular data; replaces the generic envelope.
    Dataframe(DataframePayload),
    /// The trailing value is a `list` or `dict`, kept structured.
    Structured(Value),
    /// Any other value, rendered with `repr()`.
    Repr(String),
    /// The last non-empty line does not compile as a standalone expression.
    NoExpression,
}

/// Row-major rendering of a `pandas.DataFrame`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DataframePayload {
    /// One mapping per row, keyed by column name.
    pub data: Vec<Value>,
    /// Column labels in table order.
    pub columns: Vec<Value>,
    /// `(rows, columns)`.
    pub shape: (usize, usize),
}

pub(crate) fn classify(py: Python<'_>, value: &Bound<'_, PyAny>) -> PyResult<ResultPayload> {
    if let Some(frame) = as_dataframe(py, value)? {
        return Ok(ResultPayload::Dataframe(frame));
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyDict>() {
        return Ok(ResultPayload::Structured(py_to_json(value)?));
    }
    Ok(ResultPayload::Repr(repr_string(value)?))
}

/// Renders `value` as a DataFrame payload when it is one.
///
/// pandas is looked up through `sys.modules` rather than imported: if it was
/// never loaded, no DataFrame can exist, and a fresh import attempt on every
/// call would be wasted work.
fn as_dataframe(py: Python<'_>, value: &Bound<'_, PyAny>) -> PyResult<Option<DataframePayload>> {
    let modules = PyModule::import(py, "sys")?.getattr("modules")?;
    let pandas = modules.call_method1("get", ("pandas",))?;
    if pandas.is_none() {
        return Ok(None);
    }
    let frame_type = pandas.getattr("DataFrame")?;
    if !value.is_instance(&frame_type)? {
        return Ok(None);
    }

    let records = value.call_method1("to_dict", ("records",))?;
    let data = match py_to_json(&records)? {
        Value::Array(rows) => rows,
        other => vec![other],
    };
    let labels = value.getattr("columns")?.call_method0("tolist")?;
    let columns = match py_to_json(&labels)? {
        Value::Array(labels) => labels,
        other => vec![other],
    };
    let shape: (usize, usize) = value.getattr("shape")?.extract()?;

    Ok(Some(DataframePayload {
        data,
        columns,
        shape,
    }))
}

/// Converts a Python value to JSON.
///
/// Covers `None`, `bool`, `int`, `float`, `str`, `list`, `tuple`, and `dict`;
/// anything else (and integers beyond the JSON number range) falls back to
/// its `repr()` string.
pub(crate) fn py_to_json(value: &Bound<'_, PyAny>) -> PyResult<Value> {
    if value.is_none() {
        return Ok(Value::Null);
    }
    // bool first: in Python, bool is a subclass of int.
    if value.is_instance_of::<PyBool>() {
        return Ok(Value::Bool(value.extract()?));
    }
    if value.is_instance_of::<PyInt>() {
        if let Ok(n) = value.extract::<i64>() {
            return Ok(Value::from(n));
        }
        if let Ok(n) = value.extract::<u64>() {
            return Ok(Value::from(n));
        }
        return Ok(Value::String(repr_string(value)?));
    }
    if value.is_instance_of::<PyFloat>() {
        let float: f64 = value.extract()?;
        // NaN and the infinities have no JSON spelling.
        return Ok(serde_json::Number::from_f64(float).map_or(Value::Null, Value::Number));
    }
    if value.is_instance_of::<PyString>() {
        return Ok(Value::String(text(value)?));
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        let mut items = Vec::new();
        for item in value.try_iter()? {
            items.push(py_to_json(&item?)?);
        }
        return Ok(Value::Array(items));
    }
    if let Ok(dict) = value.cast::<PyDict>() {
        let mut map = Map::new();
        for (key, item) in dict.iter() {
            // Non-string keys are coerced to text, as JSON encoding would.
            map.insert(text(&key)?, py_to_json(&item)?);
        }
        return Ok(Value::Object(map));
    }
    Ok(Value::String(repr_string(value)?))
}

pub(crate) fn repr_string(value: &Bound<'_, PyAny>) -> PyResult<String> {
    Ok(value.repr()?.to_string_lossy().into_owned())
}

fn text(value: &Bound<'_, PyAny>) -> PyResult<String> {
    Ok(value.str()?.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use pyo3::{prelude::*, types::PyDict, types::PyModule};
    use serde_json::json;

    use super::py_to_json;

    fn converted(expr: &str) -> serde_json::Value {
        Python::attach(|py| {
            let globals = PyDict::new(py);
            let value = PyModule::import(py, "builtins")
                .unwrap()
                .getattr("eval")
                .unwrap()
                .call1((expr, globals))
                .unwrap();
            py_to_json(&value).unwrap()
        })
    }

    #[test]
    fn scalars_convert_to_json_equivalents() {
        assert_eq!(converted("None"), json!(null));
        assert_eq!(converted("True"), json!(true));
        assert_eq!(converted("-7"), json!(-7));
        assert_eq!(converted("1.5"), json!(1.5));
        assert_eq!(converted("'hi'"), json!("hi"));
    }

    #[test]
    fn containers_convert_recursively_and_tuples_become_arrays() {
        assert_eq!(
            converted("{'a': [1, (2, 3)], 'b': {'c': None}}"),
            json!({"a": [1, [2, 3]], "b": {"c": null}})
        );
    }

    #[test]
    fn non_string_keys_are_coerced_to_text() {
        assert_eq!(converted("{1: 'one'}"), json!({"1": "one"}));
    }

    #[test]
    fn unserializable_values_fall_back_to_repr() {
        let value = converted("[object()]");
        let items = value.as_array().unwrap();
        assert!(items[0].as_str().unwrap().starts_with("<object object"));
    }

    #[test]
    fn nan_becomes_null() {
        assert_eq!(converted("float('nan')"), json!(null));
    }
}
