//! Turning panics and returned errors into reports.

use std::any::Any;

use tracing::warn;

use crate::messages::{self, arg};
use crate::report::{CommonReport, NamedArg, ReportLevel};
use crate::BoxError;

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

/// Collapses "panicked" and "returned an error" into one failure description.
pub(crate) fn flatten_outcome<T>(
    outcome: std::thread::Result<Result<T, BoxError>>,
) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Emits the critical `generator_exception` report.
pub(crate) fn report_generator_failure<R: CommonReport + ?Sized>(
    report: &R,
    generator: &str,
    failure: String,
) {
    warn!(generator, error = %failure, "generator failed");
    report.log(
        ReportLevel::Critical,
        messages::GENERATOR_EXCEPTION,
        &[
            NamedArg::new(arg::GENERATOR_NAME, generator),
            NamedArg::new(arg::EXCEPTION, failure),
        ],
    );
}

/// Emits the critical `no_generator_for_type` report.
pub(crate) fn report_no_generator<R: CommonReport + ?Sized>(report: &R, tag: &str) {
    warn!(tag, "no generator registered for value");
    report.log(
        ReportLevel::Critical,
        messages::NO_GENERATOR_FOR_TYPE,
        &[NamedArg::new(arg::TAG, tag)],
    );
}

/// Emits the critical `dependency_cycle` report.
pub(crate) fn report_cycle<R: CommonReport + ?Sized>(report: &R, tag: &str) {
    warn!(tag, "value depends on itself");
    report.log(
        ReportLevel::Critical,
        messages::DEPENDENCY_CYCLE,
        &[NamedArg::new(arg::TAG, tag)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_str_and_string_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(5u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "panic with a non-string payload");
    }

    #[test]
    fn flatten_outcome_keeps_error_text() {
        let failed: std::thread::Result<Result<(), BoxError>> = Ok(Err("bad input".into()));
        assert_eq!(flatten_outcome(failed), Err("bad input".to_owned()));
        let fine: std::thread::Result<Result<u8, BoxError>> = Ok(Ok(3));
        assert_eq!(flatten_outcome(fine), Ok(3));
    }
}
