//! Persistence layer: atomic JSON documents and the stores built on them.

pub mod annotations;
pub mod atomic;
pub mod final_labels;
pub mod review;

pub use annotations::AnnotationStore;
pub use final_labels::FinalLabelStore;
pub use review::ReviewSnapshot;
