//! Annotator core library: crash-safe storage and review logic for the
//! microscopy block annotator.
//!
//! Many annotators label blocks independently, each in their own JSON
//! document on a shared filesystem. Admins reconcile those documents into a
//! consensus table and export it as CSV. With the `python` feature the crate
//! builds the `_annotator_core` extension module used by the Python GUI.

pub mod cache;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod export;
pub mod keys;
pub mod models;
pub mod navigation;
pub mod registry;
pub mod session;
pub mod store;

#[cfg(feature = "python")]
pub mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::wrap_pyfunction;

// ---------------------------------------------------------------------------
// Top-level Python module: _annotator_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _annotator_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Stores -------------------------------------------------------------
    m.add_class::<python::PyAnnotationStore>()?;
    m.add_class::<python::PyFinalLabelStore>()?;
    m.add("READ_ATTEMPTS", store::atomic::READ_ATTEMPTS)?;
    m.add_function(wrap_pyfunction!(python::atomic_write_json, m)?)?;
    m.add_function(wrap_pyfunction!(python::read_json, m)?)?;

    // -- Blocks -------------------------------------------------------------
    m.add_class::<python::PyBlockRegistry>()?;
    m.add_class::<python::PyBlockCache>()?;
    m.add_function(wrap_pyfunction!(python::py_step_selection, m)?)?;

    // -- Review -------------------------------------------------------------
    m.add_function(wrap_pyfunction!(python::py_compute_consensus, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_build_consensus_table, m)?)?;
    m.add_function(wrap_pyfunction!(python::py_export_csv, m)?)?;

    Ok(())
}
