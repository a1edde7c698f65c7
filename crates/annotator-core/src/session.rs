//! The logged-in user's stores and role.

use std::fs;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::{AnnotatorError, AnnotatorResult};
use crate::keys::ContainerResolver;
use crate::store::annotations::AnnotationStore;
use crate::store::atomic::read_document;
use crate::store::final_labels::FinalLabelStore;
use crate::store::review::ReviewSnapshot;

/// Contents of `configs/roles.json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Roles {
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Roles {
    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|admin| admin == username)
    }
}

/// Everything the GUI needs for one logged-in user.
pub struct Session {
    config: AppConfig,
    username: String,
    is_admin: bool,
    store: AnnotationStore,
    final_labels: FinalLabelStore,
    resolver: Option<Arc<dyn ContainerResolver>>,
}

impl Session {
    /// Create the annotation directories, load the user's stores and read
    /// the roles file. Any storage failure aborts the session.
    pub fn open(
        config: AppConfig,
        username: &str,
        resolver: Option<Arc<dyn ContainerResolver>>,
    ) -> AnnotatorResult<Self> {
        for dir in [config.users_dir(), config.admin_dir()] {
            fs::create_dir_all(&dir).map_err(|e| AnnotatorError::write(&dir, e))?;
        }

        let store =
            AnnotationStore::load_or_create(config.user_file(username), username, resolver.clone())?;
        let final_labels = FinalLabelStore::load(config.final_labels_file(), resolver.clone())?;
        let roles = read_document::<Roles>(&config.roles_file)?.unwrap_or_default();
        let is_admin = roles.is_admin(username);
        info!("Session opened for {username} (admin: {is_admin})");

        Ok(Self {
            config,
            username: username.to_string(),
            is_admin,
            store,
            final_labels,
            resolver,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AnnotationStore {
        &mut self.store
    }

    pub fn final_labels(&self) -> &FinalLabelStore {
        &self.final_labels
    }

    pub fn final_labels_mut(&mut self) -> &mut FinalLabelStore {
        &mut self.final_labels
    }

    /// Re-read final labels and every user's document, then build the
    /// review table for `block_ids`.
    pub fn review(&mut self, block_ids: &[String]) -> AnnotatorResult<ReviewSnapshot> {
        self.final_labels.reload()?;
        ReviewSnapshot::load(
            &self.config.users_dir(),
            self.final_labels.document(),
            block_ids,
            self.resolver.as_deref(),
        )
    }
}
