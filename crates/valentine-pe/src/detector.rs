//! PE format detection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use valentine_core::cache::ValueCache;
use valentine_core::detector::FormatDetector;
use valentine_core::entity::SubjectEntity;
use valentine_core::value::make_value;
use valentine_core::{BoxError, RuleClassMask};

use crate::header::{detect_format, ImageFormat};
use crate::info::IMAGE_DATA;
use crate::{EXECUTABLE, PE, PE32, PE64};

/// Images up to this size are loaded whole (250 MiB).
pub const DEFAULT_MAX_IN_MEMORY_SIZE: u64 = 250 * 1024 * 1024;

/// Bytes read from larger images; enough for the headers.
const HEADER_WINDOW: u64 = 1024 * 1024;

const DEFAULT_EXTENSIONS: [&str; 6] = ["exe", "dll", "efi", "ocx", "scr", "sys"];

/// Recognizes PE images by extension, then by DOS/PE signatures.
///
/// A recognized image is cached under [`IMAGE_DATA`] and gets the
/// [`PE`], [`EXECUTABLE`] and [`PE32`] or [`PE64`] classes.
#[derive(Debug, Clone)]
pub struct PeFormatDetector {
    extensions: HashSet<String>,
    max_in_memory_size: u64,
}

impl Default for PeFormatDetector {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| (*ext).to_string()).collect(),
            max_in_memory_size: DEFAULT_MAX_IN_MEMORY_SIZE,
        }
    }
}

impl PeFormatDetector {
    /// Creates a detector for the usual executable extensions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest image loaded whole; only the headers of larger images are read.
    #[must_use]
    pub fn with_max_in_memory_size(mut self, bytes: u64) -> Self {
        self.max_in_memory_size = bytes;
        self
    }

    fn accepts_extension(&self, entity: &dyn SubjectEntity) -> bool {
        entity
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.contains(&ext))
    }
}

#[async_trait]
impl FormatDetector for PeFormatDetector {
    async fn detect(
        &self,
        entity: &Arc<dyn SubjectEntity>,
        cache: &mut ValueCache,
    ) -> Result<RuleClassMask, BoxError> {
        if !self.accepts_extension(entity.as_ref()) {
            return Ok(RuleClassMask::empty());
        }

        let limit = if entity.size() <= self.max_in_memory_size {
            entity.size()
        } else {
            HEADER_WINDOW
        };
        let file = tokio::fs::File::open(entity.path()).await?;
        let mut data = Vec::with_capacity(usize::try_from(limit).unwrap_or(0));
        file.take(limit).read_to_end(&mut data).await?;

        let Some(format) = detect_format(&data) else {
            debug!(path = %entity.path().display(), "not a PE image");
            return Ok(RuleClassMask::empty());
        };
        cache.set(IMAGE_DATA, Some(make_value(data)));

        let flavor = match format {
            ImageFormat::Pe32 => PE32,
            ImageFormat::Pe64 => PE64,
        };
        Ok(RuleClassMask::empty().with(PE).with(EXECUTABLE).with(flavor))
    }
}
