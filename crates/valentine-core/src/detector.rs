//! Seam between the engine and format specific parsing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::ValueCache;
use crate::entity::SubjectEntity;
use crate::{BoxError, RuleClassMask};

/// Decides which rule classes apply to an entity.
///
/// The detector may pre-populate `cache` with whatever it parsed on the way
/// (headers, the whole file contents, ...), so that generators do not have to
/// read the entity again.
#[async_trait]
pub trait FormatDetector: Send + Sync {
    /// Returns the detected classes; an empty mask means "unsupported".
    async fn detect(
        &self,
        entity: &Arc<dyn SubjectEntity>,
        cache: &mut ValueCache,
    ) -> Result<RuleClassMask, BoxError>;
}
