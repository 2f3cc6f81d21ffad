//! Live rendering of reports as `tracing` events.
//!
//! Rule findings and diagnostics are emitted under the `valentine::report`
//! target so that they can be filtered independently of engine logs.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use valentine_core::entity::SubjectEntity;
use valentine_core::report::{
    CommonReport, EntityReport, NamedArg, ReportDescriptor, ReportFactory, ReportLevel,
};

/// Formats arguments as `name=value` pairs separated by spaces.
#[must_use]
pub fn render_args(args: &[NamedArg]) -> String {
    args.iter()
        .map(|arg| format!("{}={}", arg.name, arg.value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn emit(level: ReportLevel, path: Option<&PathBuf>, id: &str, args: &[NamedArg]) {
    let path = path.map(|p| p.display().to_string()).unwrap_or_default();
    let args = render_args(args);
    match level {
        ReportLevel::Critical | ReportLevel::Error => {
            error!(target: "valentine::report", %level, path = %path, id, args = %args, "report");
        }
        ReportLevel::Warning => {
            warn!(target: "valentine::report", %level, path = %path, id, args = %args, "report");
        }
        ReportLevel::Info => {
            info!(target: "valentine::report", %level, path = %path, id, args = %args, "report");
        }
    }
}

/// Factory of sinks writing every report to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalReport;

impl ReportFactory for TerminalReport {
    fn common_report(&self) -> Arc<dyn CommonReport> {
        Arc::new(TerminalSink { path: None })
    }

    fn entity_report(&self, entity: &Arc<dyn SubjectEntity>) -> Arc<dyn EntityReport> {
        Arc::new(TerminalSink {
            path: Some(entity.path().to_path_buf()),
        })
    }
}

struct TerminalSink {
    path: Option<PathBuf>,
}

impl CommonReport for TerminalSink {
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]) {
        emit(level, self.path.as_ref(), message_id, args);
    }
}

impl EntityReport for TerminalSink {
    fn rule_log(&self, report: &ReportDescriptor, args: &[NamedArg]) {
        emit(report.level, self.path.as_ref(), report.uid, args);
    }
}
