//! Application configuration loaded from environment variables.
//!
//! | variable                     | default                          |
//! |------------------------------|----------------------------------|
//! | `ANNOTATOR_DATA_ROOT`        | `./data/blocks`                  |
//! | `ANNOTATOR_ANNOTATIONS_ROOT` | `./annotations`                  |
//! | `ANNOTATOR_ROLES_FILE`       | `./configs/roles.json`           |
//! | `ANNOTATOR_CLASSES_FILE`     | `classes.json` next to the roles |
//!
//! The classes file accepts either a list of `{"name", "color"}` objects or a
//! list of bare names. Anything else falls back to the built-in classes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::Label;

pub const DATA_ROOT_VAR: &str = "ANNOTATOR_DATA_ROOT";
pub const ANNOTATIONS_ROOT_VAR: &str = "ANNOTATOR_ANNOTATIONS_ROOT";
pub const ROLES_FILE_VAR: &str = "ANNOTATOR_ROLES_FILE";
pub const CLASSES_FILE_VAR: &str = "ANNOTATOR_CLASSES_FILE";

const DEFAULT_CLASSES: &[(&str, &str)] = &[
    ("Class 1", "#22AA44"),
    ("Class 2", "#2266FF"),
    ("Class 3", "#FF6622"),
];

/// Color given to name-only classes past the end of the default palette.
const FALLBACK_COLOR: &str = "#AAAAAA";

/// A labelling class as shown to annotators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub color: String,
}

/// Accepted shapes of the `classes` list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ClassEntries {
    Detailed(Vec<ClassDef>),
    Names(Vec<String>),
}

#[derive(Deserialize)]
struct ClassesFile {
    classes: ClassEntries,
}

impl ClassEntries {
    fn normalize(self) -> Vec<ClassDef> {
        match self {
            ClassEntries::Detailed(defs) => defs,
            ClassEntries::Names(names) => names
                .into_iter()
                .enumerate()
                .map(|(i, name)| ClassDef {
                    name,
                    color: DEFAULT_CLASSES
                        .get(i)
                        .map_or(FALLBACK_COLOR, |(_, color)| *color)
                        .to_string(),
                })
                .collect(),
        }
    }
}

pub fn default_classes() -> Vec<ClassDef> {
    DEFAULT_CLASSES
        .iter()
        .map(|(name, color)| ClassDef {
            name: name.to_string(),
            color: color.to_string(),
        })
        .collect()
}

/// Load class definitions from `path`, using the defaults on any problem.
pub fn load_class_defs(path: &Path) -> Vec<ClassDef> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!("No class definitions at {}: {err}", path.display());
            return default_classes();
        }
    };
    match serde_json::from_str::<ClassesFile>(&raw) {
        Ok(file) => {
            let defs = file.classes.normalize();
            if defs.is_empty() {
                default_classes()
            } else {
                defs
            }
        }
        Err(err) => {
            warn!("Ignoring class definitions in {}: {err}", path.display());
            default_classes()
        }
    }
}

/// Centralised application configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub data_root: PathBuf,
    pub annotations_root: PathBuf,
    pub roles_file: PathBuf,
    pub classes_file: PathBuf,
    pub autoplay_interval_ms: u64,
    /// Current block plus preloaded neighbours.
    pub max_cached_blocks: usize,
    pub classes: Vec<ClassDef>,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        let roles_file = var(ROLES_FILE_VAR, "./configs/roles.json");
        // Follow the roles file so a relative ANNOTATOR_ROLES_FILE still finds
        // its sibling classes file.
        let classes_file = match lookup(CLASSES_FILE_VAR) {
            Some(path) => PathBuf::from(path),
            None => roles_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("classes.json"),
        };
        let classes = load_class_defs(&classes_file);

        Self {
            data_root: var(DATA_ROOT_VAR, "./data/blocks"),
            annotations_root: var(ANNOTATIONS_ROOT_VAR, "./annotations"),
            roles_file,
            classes_file,
            autoplay_interval_ms: 500,
            max_cached_blocks: 10,
            classes,
        }
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// `label -> color` where label `i + 1` is the i-th class.
    pub fn label_color_map(&self) -> BTreeMap<Label, String> {
        (1..)
            .zip(self.classes.iter())
            .map(|(label, class)| (label, class.color.clone()))
            .collect()
    }

    pub fn users_dir(&self) -> PathBuf {
        self.annotations_root.join("users")
    }

    pub fn admin_dir(&self) -> PathBuf {
        self.annotations_root.join("admin")
    }

    pub fn final_labels_file(&self) -> PathBuf {
        self.admin_dir().join("final_labels.json")
    }

    pub fn user_file(&self, username: &str) -> PathBuf {
        self.users_dir().join(format!("{username}.json"))
    }

    /// Per-user channel display preferences (LUT and contrast range).
    pub fn channel_prefs_file(&self, username: &str) -> PathBuf {
        self.users_dir().join(format!("{username}_display.json"))
    }
}
