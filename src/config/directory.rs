use log::{ info, warn };
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::models::{ Group, UserRef };
use crate::store::InMemoryMessageStore;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory file IO error: {0}")] Io(#[from] std::io::Error),
    #[error("Directory JSON parsing error: {0}")] Json(#[from] serde_json::Error),
    #[error("Duplicate user id '{0}' in directory")] DuplicateUser(String),
    #[error("Group '{0}' has no members")] EmptyGroup(String),
}

/// Users and groups the messaging core needs to know about. Profiles and membership are
/// owned elsewhere; this file is the seed handed to the store at startup.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Directory {
    #[serde(default)]
    pub users: Vec<UserRef>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Directory {
    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        let directory: Directory = serde_json::from_str(json)?;
        directory.validate()?;
        Ok(directory)
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        let mut ids = HashSet::new();
        for user in &self.users {
            if !ids.insert(user.id.as_str()) {
                return Err(DirectoryError::DuplicateUser(user.id.clone()));
            }
        }
        for group in &self.groups {
            if group.member_ids.is_empty() {
                return Err(DirectoryError::EmptyGroup(group.id.clone()));
            }
            for member in group.member_ids.iter().filter(|m| !ids.contains(m.as_str())) {
                warn!("Group '{}' lists unknown member '{}'", group.id, member);
            }
        }
        Ok(())
    }

    pub fn install_into(&self, store: &InMemoryMessageStore) {
        for user in &self.users {
            store.add_user(user.clone());
        }
        for group in &self.groups {
            store.add_group(group.clone());
        }
    }
}

/// Loads the directory seed. A missing file yields an empty directory.
pub fn load_directory(path: &str) -> Result<Directory, DirectoryError> {
    if !Path::new(path).exists() {
        warn!("Directory file '{}' not found; starting with no users or groups", path);
        return Ok(Directory::default());
    }
    let content = fs::read_to_string(path)?;
    let directory = Directory::from_json(&content)?;
    info!(
        "Loaded directory from {}: {} users, {} groups",
        path,
        directory.users.len(),
        directory.groups.len()
    );
    Ok(directory)
}
