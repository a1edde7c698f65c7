//! Python bindings for the `_annotator_core` extension module.
//!
//! Structured values cross the boundary as JSON through Python's own `json`
//! module, so the Python side sees plain dicts and lists.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::BlockCache;
use crate::consensus;
use crate::export;
use crate::keys::ContainerResolver;
use crate::models::{ConsensusRow, FinalLabelRecord, Label};
use crate::navigation::{self, Direction};
use crate::registry::{BlockInfo, BlockRegistry, SharedRegistry};
use crate::store::annotations::AnnotationStore;
use crate::store::atomic::{read_document, write_document};
use crate::store::final_labels::FinalLabelStore;

fn from_py<T: DeserializeOwned>(value: &Bound<'_, PyAny>) -> PyResult<T> {
    let text: String = value
        .py()
        .import("json")?
        .call_method1("dumps", (value,))?
        .extract()?;
    serde_json::from_str(&text).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn to_py<T: Serialize + ?Sized>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let text = serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    py.import("json")?
        .call_method1("loads", (text,))
        .map(|o| o.into())
}

fn resolver_of(registry: Option<PyRef<'_, PyBlockRegistry>>) -> Option<Arc<dyn ContainerResolver>> {
    registry.map(|r| r.inner.resolver())
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[pyclass(name = "AnnotationStore")]
pub struct PyAnnotationStore {
    inner: AnnotationStore,
}

#[pymethods]
impl PyAnnotationStore {
    #[new]
    #[pyo3(signature = (filepath, username, registry=None))]
    fn new(
        filepath: PathBuf,
        username: &str,
        registry: Option<PyRef<'_, PyBlockRegistry>>,
    ) -> PyResult<Self> {
        let inner = AnnotationStore::load_or_create(filepath, username, resolver_of(registry))?;
        Ok(Self { inner })
    }

    fn get_label(&self, block_id: &str) -> Option<Label> {
        self.inner.get_label(block_id)
    }

    fn set_label(&mut self, block_id: &str, label: Label) -> PyResult<()> {
        Ok(self.inner.set_label(block_id, label)?)
    }

    fn clear_label(&mut self, block_id: &str) -> PyResult<bool> {
        Ok(self.inner.clear_label(block_id)?)
    }

    fn all_annotations(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.all_annotations())
    }

    fn annotated_block_ids(&self) -> HashSet<String> {
        self.inner.annotated_block_ids()
    }

    fn annotated_count(&self) -> usize {
        self.inner.annotated_count()
    }

    /// Labelled ids among the displayed `block_ids`; use for skipping and
    /// progress.
    fn annotated_among(&self, block_ids: Vec<String>) -> HashSet<String> {
        self.inner.annotated_among(&block_ids)
    }

    #[getter]
    fn username(&self) -> String {
        self.inner.username().to_string()
    }
}

#[pyclass(name = "FinalLabelStore")]
pub struct PyFinalLabelStore {
    inner: FinalLabelStore,
}

#[pymethods]
impl PyFinalLabelStore {
    #[new]
    #[pyo3(signature = (filepath, registry=None))]
    fn new(filepath: PathBuf, registry: Option<PyRef<'_, PyBlockRegistry>>) -> PyResult<Self> {
        let inner = FinalLabelStore::load(filepath, resolver_of(registry))?;
        Ok(Self { inner })
    }

    fn reload(&mut self) -> PyResult<()> {
        Ok(self.inner.reload()?)
    }

    fn set_final_label(&mut self, block_id: &str, label: Label, admin_username: &str) -> PyResult<()> {
        Ok(self.inner.set_final_label(block_id, label, admin_username)?)
    }

    fn clear_final_label(&mut self, block_id: &str) -> PyResult<bool> {
        Ok(self.inner.clear_final_label(block_id)?)
    }

    fn get_final_label(&self, block_id: &str) -> Option<Label> {
        self.inner.get_final_label(block_id)
    }

    fn all_labels(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.all_labels())
    }
}

// ---------------------------------------------------------------------------
// Registry and cache
// ---------------------------------------------------------------------------

/// Stores constructed with a registry resolve through the same handle, so
/// `rescan` is visible to them immediately.
#[pyclass(name = "BlockRegistry")]
pub struct PyBlockRegistry {
    inner: SharedRegistry,
}

fn block_to_py(py: Python<'_>, block: &BlockInfo) -> PyResult<PyObject> {
    let dict = PyDict::new(py);
    dict.set_item("block_id", &block.block_id)?;
    dict.set_item("path", block.path.to_string_lossy().into_owned())?;
    let files: Vec<String> = block
        .tiff_files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    dict.set_item("tiff_files", files)?;
    Ok(dict.into())
}

#[pymethods]
impl PyBlockRegistry {
    #[new]
    fn new(data_root: PathBuf) -> Self {
        Self {
            inner: SharedRegistry::new(BlockRegistry::new(data_root)),
        }
    }

    fn scan(&self) {
        self.inner.scan();
    }

    #[pyo3(signature = (new_root=None))]
    fn rescan(&self, new_root: Option<PathBuf>) {
        self.inner.rescan(new_root);
    }

    fn block_ids(&self) -> Vec<String> {
        self.inner.read().block_ids()
    }

    fn all_blocks(&self, py: Python<'_>) -> PyResult<Vec<PyObject>> {
        self.inner
            .read()
            .all_blocks()
            .iter()
            .map(|b| block_to_py(py, b))
            .collect()
    }

    fn get_block(&self, py: Python<'_>, block_id: &str) -> PyResult<Option<PyObject>> {
        self.inner
            .read()
            .get_block(block_id)
            .map(|b| block_to_py(py, b))
            .transpose()
    }

    fn block_count(&self) -> usize {
        self.inner.read().block_count()
    }

    #[getter]
    fn data_root(&self) -> String {
        self.inner.read().data_root().to_string_lossy().into_owned()
    }

    fn resolve_absolute_container(&self, block_id: &str) -> Option<String> {
        self.inner.resolve_absolute_container(block_id)
    }
}

#[pyclass(name = "BlockCache")]
pub struct PyBlockCache {
    inner: BlockCache<PyObject>,
}

#[pymethods]
impl PyBlockCache {
    #[new]
    #[pyo3(signature = (max_size=10))]
    fn new(max_size: usize) -> Self {
        Self {
            inner: BlockCache::new(max_size),
        }
    }

    fn get(&self, py: Python<'_>, block_id: &str) -> Option<PyObject> {
        self.inner
            .get(block_id)
            .map(|value| value.clone_ref(py))
    }

    fn put(&self, block_id: String, value: PyObject) {
        self.inner.put(block_id, value);
    }

    fn missing(&self, block_ids: Vec<String>) -> Vec<String> {
        self.inner
            .missing(&block_ids)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn clear(&self) {
        self.inner.clear();
    }

    fn __contains__(&self, block_id: &str) -> bool {
        self.inner.contains(block_id)
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

#[pyfunction]
#[pyo3(name = "compute_consensus")]
pub fn py_compute_consensus(labels: Vec<Option<Label>>) -> (Option<Label>, bool) {
    consensus::compute_consensus(&labels)
}

/// `all_user_annotations` is `{username: {block_id: {"label", ...}}}`. Entries
/// without a usable label are treated as absent.
#[pyfunction]
#[pyo3(name = "build_consensus_table")]
pub fn py_build_consensus_table(
    py: Python<'_>,
    all_user_annotations: &Bound<'_, PyAny>,
    block_ids: Vec<String>,
) -> PyResult<PyObject> {
    let raw: serde_json::Value = from_py(all_user_annotations)?;
    let all = consensus::user_annotations_from_json(&raw);
    to_py(py, &consensus::build_consensus_table(&all, &block_ids))
}

#[pyfunction]
#[pyo3(name = "export_csv")]
pub fn py_export_csv(
    rows: &Bound<'_, PyAny>,
    final_labels: &Bound<'_, PyAny>,
    destination: PathBuf,
    usernames: Vec<String>,
) -> PyResult<()> {
    let rows: Vec<ConsensusRow> = from_py(rows)?;
    let finals: indexmap::IndexMap<String, FinalLabelRecord> = from_py(final_labels)?;
    Ok(export::export_csv(&rows, &finals, &destination, &usernames)?)
}

#[pyfunction]
pub fn atomic_write_json(path: PathBuf, data: &Bound<'_, PyAny>) -> PyResult<()> {
    let value: serde_json::Value = from_py(data)?;
    Ok(write_document(&path, &value)?)
}

/// Returns `None` when the file does not exist.
#[pyfunction]
pub fn read_json(py: Python<'_>, path: PathBuf) -> PyResult<Option<PyObject>> {
    read_document::<serde_json::Value>(&path)?
        .map(|value| to_py(py, &value))
        .transpose()
}

/// `direction` is `+1` or `-1`.
#[pyfunction]
#[pyo3(name = "step_selection", signature = (block_ids, current, direction, skip=None))]
pub fn py_step_selection(
    block_ids: Vec<String>,
    current: Option<usize>,
    direction: i64,
    skip: Option<HashSet<String>>,
) -> PyResult<Option<usize>> {
    let direction = match direction {
        1 => Direction::Next,
        -1 => Direction::Previous,
        other => {
            return Err(PyValueError::new_err(format!(
                "direction must be 1 or -1, got {other}"
            )))
        }
    };
    Ok(navigation::step_selection(
        &block_ids,
        current,
        direction,
        skip.as_ref(),
    ))
}
