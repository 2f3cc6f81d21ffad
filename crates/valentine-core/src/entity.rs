//! Subjects of analysis.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::value::ValueTag;

/// Tag under which every entity provider exposes its own entity
/// (`Arc<dyn SubjectEntity>`).
pub const ENTITY_TAG: ValueTag = ValueTag::new("core.subject_entity");

/// A file (or other addressable object) being analyzed.
pub trait SubjectEntity: Send + Sync + fmt::Debug {
    /// Location of the entity.
    fn path(&self) -> &Path;

    /// Size in bytes, used as admission weight for size-based preload limits.
    fn size(&self) -> u64;
}

/// A regular file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntity {
    path: PathBuf,
    size: u64,
}

impl FileEntity {
    /// Creates an entity for `path` with the given size.
    #[must_use]
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size }
    }
}

impl SubjectEntity for FileEntity {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }
}
