//! Forwarding one report stream to several sinks.

use std::sync::Arc;

use valentine_core::entity::SubjectEntity;
use valentine_core::report::{
    CommonReport, EntityReport, NamedArg, ReportDescriptor, ReportFactory, ReportLevel,
};

/// Factory whose sinks forward to the sinks of every inner factory, in order.
#[derive(Default)]
pub struct FanOutFactory {
    factories: Vec<Arc<dyn ReportFactory>>,
}

impl FanOutFactory {
    /// Creates a factory without targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target factory.
    #[must_use]
    pub fn with(mut self, factory: Arc<dyn ReportFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Number of target factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ReportFactory for FanOutFactory {
    fn common_report(&self) -> Arc<dyn CommonReport> {
        Arc::new(FanOutCommon(
            self.factories.iter().map(|f| f.common_report()).collect(),
        ))
    }

    fn entity_report(&self, entity: &Arc<dyn SubjectEntity>) -> Arc<dyn EntityReport> {
        Arc::new(FanOutEntity(
            self.factories.iter().map(|f| f.entity_report(entity)).collect(),
        ))
    }
}

struct FanOutCommon(Vec<Arc<dyn CommonReport>>);

impl CommonReport for FanOutCommon {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        for sink in &self.0 {
            sink.log(level, message_id, args);
        }
    }
}

struct FanOutEntity(Vec<Arc<dyn EntityReport>>);

impl CommonReport for FanOutEntity {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        for sink in &self.0 {
            sink.log(level, message_id, args);
        }
    }
}

impl EntityReport for FanOutEntity {
    fn rule_log(&self, report: &ReportDescriptor, args: &[NamedArg]) {
        for sink in &self.0 {
            sink.rule_log(report, args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use valentine_core::entity::FileEntity;
    use valentine_core::report::ReportCategory;

    use crate::store::InMemoryReport;

    #[test]
    fn every_target_receives_every_report() {
        let first = Arc::new(InMemoryReport::new());
        let second = Arc::new(InMemoryReport::new());
        let factory = FanOutFactory::new().with(first.clone()).with(second.clone());
        assert_eq!(factory.len(), 2);

        let entity: Arc<dyn SubjectEntity> = Arc::new(FileEntity::new(PathBuf::from("a.dll"), 1));
        let report = factory.entity_report(&entity);
        report.rule_log(
            &ReportDescriptor::new("PE056", ReportCategory::Security, ReportLevel::Error),
            &[],
        );
        factory.common_report().log(ReportLevel::Info, "hello", &[]);

        for store in [first, second] {
            let snapshot = store.snapshot();
            assert_eq!(snapshot.finding_count(), 1);
            assert_eq!(snapshot.common.len(), 1);
        }
    }
}
