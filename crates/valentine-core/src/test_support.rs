//! Report sinks recording everything they receive, for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::report::{CommonReport, EntityReport, NamedArg, ReportDescriptor, ReportLevel};

#[derive(Debug, Clone)]
pub(crate) struct LoggedMessage {
    pub level: ReportLevel,
    pub message_id: String,
    pub args: Vec<NamedArg>,
}

impl LoggedMessage {
    pub fn arg(&self, name: &str) -> Option<String> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.to_string())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingReport {
    pub messages: Mutex<Vec<LoggedMessage>>,
    pub findings: Mutex<Vec<(&'static str, Vec<NamedArg>)>>,
}

impl RecordingReport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.message_id.clone())
            .collect()
    }

    pub fn finding_uids(&self) -> Vec<&'static str> {
        self.findings.lock().iter().map(|(uid, _)| *uid).collect()
    }
}

impl CommonReport for RecordingReport {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        self.messages.lock().push(LoggedMessage {
            level,
            message_id: message_id.to_owned(),
            args: args.to_vec(),
        });
    }
}

impl EntityReport for RecordingReport {
    fn rule_log(&self, report: &ReportDescriptor, args: &[NamedArg]) {
        self.findings.lock().push((report.uid, args.to_vec()));
    }
}
