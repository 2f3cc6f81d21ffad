//! Buffered, in-memory report sinks.
//!
//! [`InMemoryReport`] keeps everything reported during a run so that output
//! writers can persist it once the run is over. [`InMemoryCommonReport`] on
//! its own buffers diagnostics produced before a run starts (configuration
//! warnings and the like) until they can be replayed into the run's sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use valentine_core::entity::SubjectEntity;
use valentine_core::report::{
    CommonReport, EntityReport, NamedArg, ReportCategory, ReportDescriptor, ReportFactory,
    ReportLevel,
};

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A buffered diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    /// Severity.
    pub level: ReportLevel,
    /// Message identifier.
    pub message_id: String,
    /// Named arguments.
    pub args: Vec<NamedArg>,
}

/// A buffered rule finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFinding {
    /// Report uid.
    pub uid: String,
    /// Report category.
    pub category: ReportCategory,
    /// Report level.
    pub level: ReportLevel,
    /// Named arguments.
    pub args: Vec<NamedArg>,
}

impl StoredFinding {
    fn new(report: &ReportDescriptor, args: &[NamedArg]) -> Self {
        Self {
            uid: report.uid.to_owned(),
            category: report.category,
            level: report.level,
            args: args.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryCommonReport
// ---------------------------------------------------------------------------

/// Buffers run-level diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryCommonReport {
    messages: Mutex<Vec<StoredMessage>>,
}

impl InMemoryCommonReport {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the buffered messages.
    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Returns `true` if nothing was buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Forwards every buffered message, in order, to `target`.
    pub fn replay_into(&self, target: &dyn CommonReport) {
        for message in self.messages.lock().iter() {
            target.log(message.level, &message.message_id, &message.args);
        }
    }
}

impl CommonReport for InMemoryCommonReport {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        self.messages.lock().push(StoredMessage {
            level,
            message_id: message_id.to_owned(),
            args: args.to_vec(),
        });
    }
}

// ---------------------------------------------------------------------------
// InMemoryEntityReport
// ---------------------------------------------------------------------------

/// Buffers everything reported about one entity.
#[derive(Debug)]
pub struct InMemoryEntityReport {
    path: PathBuf,
    messages: Mutex<Vec<StoredMessage>>,
    findings: Mutex<Vec<StoredFinding>>,
}

impl InMemoryEntityReport {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            messages: Mutex::new(Vec::new()),
            findings: Mutex::new(Vec::new()),
        }
    }

    /// Path of the entity.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            path: self.path.to_string_lossy().replace('\\', "/"),
            messages: self.messages.lock().clone(),
            findings: self.findings.lock().clone(),
        }
    }
}

impl CommonReport for InMemoryEntityReport {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        self.messages.lock().push(StoredMessage {
            level,
            message_id: message_id.to_owned(),
            args: args.to_vec(),
        });
    }
}

impl EntityReport for InMemoryEntityReport {
    fn rule_log(&self, report: &ReportDescriptor, args: &[NamedArg]) {
        self.findings.lock().push(StoredFinding::new(report, args));
    }
}

// ---------------------------------------------------------------------------
// InMemoryReport
// ---------------------------------------------------------------------------

/// Report factory buffering a whole run.
#[derive(Debug, Default)]
pub struct InMemoryReport {
    common: Arc<InMemoryCommonReport>,
    entities: Mutex<Vec<Arc<InMemoryEntityReport>>>,
}

impl InMemoryReport {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The run-level buffer.
    #[must_use]
    pub fn common(&self) -> &Arc<InMemoryCommonReport> {
        &self.common
    }

    /// Copies the current contents, entities sorted by path.
    ///
    /// Entities nothing was reported about are left out.
    #[must_use]
    pub fn snapshot(&self) -> ReportSnapshot {
        let mut entities: Vec<EntitySnapshot> = self
            .entities
            .lock()
            .iter()
            .map(|entity| entity.snapshot())
            .filter(|entity| !entity.messages.is_empty() || !entity.findings.is_empty())
            .collect();
        entities.sort_by(|a, b| a.path.cmp(&b.path));
        ReportSnapshot {
            common: self.common.messages(),
            entities,
        }
    }
}

impl ReportFactory for InMemoryReport {
    fn common_report(&self) -> Arc<dyn CommonReport> {
        self.common.clone()
    }

    fn entity_report(&self, entity: &Arc<dyn SubjectEntity>) -> Arc<dyn EntityReport> {
        let report = Arc::new(InMemoryEntityReport::new(entity.path().to_path_buf()));
        self.entities.lock().push(report.clone());
        report
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything reported about one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    /// Entity path, with forward slashes.
    pub path: String,
    /// Diagnostics about the entity.
    pub messages: Vec<StoredMessage>,
    /// Rule findings.
    pub findings: Vec<StoredFinding>,
}

/// Point-in-time copy of an [`InMemoryReport`], consumed by output writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSnapshot {
    /// Run-level diagnostics.
    pub common: Vec<StoredMessage>,
    /// Per-entity reports, sorted by path.
    pub entities: Vec<EntitySnapshot>,
}

impl ReportSnapshot {
    /// Total number of rule findings.
    #[must_use]
    pub fn finding_count(&self) -> usize {
        self.entities.iter().map(|e| e.findings.len()).sum()
    }

    /// Total number of diagnostics, run-level and per-entity.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.common.len() + self.entities.iter().map(|e| e.messages.len()).sum::<usize>()
    }

    /// Highest level among all rule findings.
    #[must_use]
    pub fn max_finding_level(&self) -> Option<ReportLevel> {
        self.entities
            .iter()
            .flat_map(|e| e.findings.iter().map(|f| f.level))
            .max()
    }
}
