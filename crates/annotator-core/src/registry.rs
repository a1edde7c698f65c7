//! Discovery of `block_NNNN/` directories under the data root.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::{RwLock, RwLockReadGuard};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::keys::ContainerResolver;

static BLOCK_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^block_\d{4}$").unwrap());

/// One annotatable block on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: String,
    pub path: PathBuf,
    /// One file per channel: `*.tiff` sorted, then `*.tif` sorted.
    pub tiff_files: Vec<PathBuf>,
}

impl BlockInfo {
    pub fn channel_count(&self) -> usize {
        self.tiff_files.len()
    }
}

/// Ordered list of the blocks found under a data root.
#[derive(Debug)]
pub struct BlockRegistry {
    data_root: PathBuf,
    blocks: Vec<BlockInfo>,
}

impl BlockRegistry {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            blocks: Vec::new(),
        }
    }

    /// Repopulate the block list from the filesystem.
    pub fn scan(&mut self) {
        self.blocks.clear();
        if !self.data_root.is_dir() {
            debug!("Data root {} does not exist", self.data_root.display());
            return;
        }

        for entry in children(&self.data_root) {
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !BLOCK_DIR_RE.is_match(&name) {
                continue;
            }
            self.blocks.push(BlockInfo {
                block_id: name.into_owned(),
                path: entry.path().to_path_buf(),
                tiff_files: channel_files(entry.path()),
            });
        }
        debug!(
            "Found {} blocks under {}",
            self.blocks.len(),
            self.data_root.display()
        );
    }

    /// Optionally switch data root, then scan again.
    pub fn rescan(&mut self, new_root: Option<PathBuf>) {
        if let Some(root) = new_root {
            self.data_root = root;
        }
        self.scan();
    }

    pub fn all_blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    pub fn block_ids(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.block_id.clone()).collect()
    }

    pub fn get_block(&self, block_id: &str) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

impl ContainerResolver for BlockRegistry {
    /// Canonical absolute path of the directory holding `block_id`.
    fn resolve_absolute_container(&self, block_id: &str) -> Option<String> {
        let block = self.get_block(block_id)?;
        let parent = block.path.parent()?;
        let absolute = match std::fs::canonicalize(parent) {
            Ok(p) => p,
            Err(err) => {
                warn!("Could not canonicalize {}: {err}", parent.display());
                std::env::current_dir().ok()?.join(parent)
            }
        };
        Some(absolute.to_string_lossy().replace('\\', "/"))
    }
}

/// A registry handle shared by the stores resolving through it and the
/// caller that rescans it. Rescanning updates every holder in place, so a
/// store keeps producing the same keys as a freshly opened one after the data
/// root changes.
#[derive(Clone, Debug)]
pub struct SharedRegistry(Arc<RwLock<BlockRegistry>>);

impl SharedRegistry {
    pub fn new(registry: BlockRegistry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BlockRegistry> {
        self.0.read()
    }

    pub fn scan(&self) {
        self.0.write().scan();
    }

    pub fn rescan(&self, new_root: Option<PathBuf>) {
        self.0.write().rescan(new_root);
    }

    /// This handle as a store resolver.
    pub fn resolver(&self) -> Arc<dyn ContainerResolver> {
        Arc::new(self.clone())
    }
}

impl ContainerResolver for SharedRegistry {
    fn resolve_absolute_container(&self, block_id: &str) -> Option<String> {
        self.0.read().resolve_absolute_container(block_id)
    }
}

/// Direct children of `dir`, sorted by file name.
fn children(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry: {err}");
                None
            }
        })
}

fn channel_files(block_dir: &Path) -> Vec<PathBuf> {
    let with_ext = |ext: &str| -> Vec<PathBuf> {
        children(block_dir)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|x| x == ext))
            .collect()
    };
    let mut files = with_ext("tiff");
    files.extend(with_ext("tif"));
    files
}
