//! Valentine PE -- built-in support for Windows PE images.
//!
//! The crate plugs a real format into the engine:
//!
//! - [`detector::PeFormatDetector`] recognizes PE32/PE32+ images and caches their bytes.
//! - [`info`] parses the headers and derives [`info::BasicPeInfo`].
//! - [`rules::SimpleFlagsRule`] checks DEP, dynamic base and the 64-bit
//!   address space flags.
//!
//! [`register`] adds the generators and rules to an [`EngineRegistry`];
//! [`engine_registry`] builds a ready-to-run registry around the detector.

use std::sync::Arc;

use valentine_analysis::EngineRegistry;
use valentine_core::{CoreResult, RuleClass};

pub mod detector;
pub mod header;
pub mod info;
pub mod rules;

#[cfg(test)]
pub(crate) mod test_support;

pub use detector::PeFormatDetector;
pub use rules::report_titles;

/// Every PE image.
pub const PE: RuleClass = RuleClass::new(0);
/// Every executable image.
pub const EXECUTABLE: RuleClass = RuleClass::new(1);
/// PE32 images.
pub const PE32: RuleClass = RuleClass::new(2);
/// PE32+ images.
pub const PE64: RuleClass = RuleClass::new(3);

/// Display name of a rule class defined by this crate.
#[must_use]
pub fn rule_class_name(class: RuleClass) -> Option<&'static str> {
    match class {
        PE => Some("pe"),
        EXECUTABLE => Some("executable"),
        PE32 => Some("pe32"),
        PE64 => Some("pe64"),
        _ => None,
    }
}

/// Registers the PE generators and rules.
///
/// # Errors
///
/// Returns [`valentine_core::CoreError`] if a generator tag or report uid
/// clashes with one already registered.
pub fn register(registry: &mut EngineRegistry) -> CoreResult<()> {
    registry.add_generator(Arc::new(info::PeHeadersGenerator))?;
    registry.add_generator(Arc::new(info::BasicPeInfoGenerator))?;
    registry.add_rule(Arc::new(rules::SimpleFlagsRule))?;
    Ok(())
}

/// A registry using [`PeFormatDetector`] with every built-in rule.
///
/// # Errors
///
/// See [`register`].
pub fn engine_registry() -> CoreResult<EngineRegistry> {
    let mut registry = EngineRegistry::new(Arc::new(PeFormatDetector::new()));
    register(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use valentine_analysis::{AnalysisPlan, AnalysisPlanRunner, PlanTarget};
    use valentine_core::messages;

    use crate::header::dll_characteristics;
    use crate::test_support::ImageSpec;

    #[test]
    fn registering_twice_is_rejected() {
        let mut registry = engine_registry().unwrap();
        assert!(register(&mut registry).is_err());
    }

    #[test]
    fn rule_classes_have_names() {
        assert_eq!(rule_class_name(PE64), Some("pe64"));
        assert_eq!(rule_class_name(RuleClass::new(40)), None);
    }

    #[test]
    fn analyzes_a_directory_of_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.exe"), ImageSpec::hardened_pe64().build()).unwrap();
        let weak = ImageSpec {
            dll_characteristics: dll_characteristics::TERMINAL_SERVER_AWARE,
            ..ImageSpec::default()
        };
        fs::write(dir.path().join("weak.dll"), weak.build()).unwrap();
        fs::write(dir.path().join("broken.exe"), b"MZ").unwrap();
        let mut truncated = ImageSpec::default().build();
        truncated.truncate(0x190);
        fs::write(dir.path().join("truncated.sys"), truncated).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();

        let mut plan = AnalysisPlan::new(dir.path());
        plan.targets.push(PlanTarget::new(dir.path()));
        plan.terminal_output = false;
        plan.signal_cancellation = false;

        let summary = AnalysisPlanRunner::new(plan, Arc::new(engine_registry().unwrap()))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(summary.stats.analyzed, 3);
        assert_eq!(summary.stats.skipped_unsupported, 2);

        let weak = summary
            .snapshot
            .entities
            .iter()
            .find(|e| e.path.ends_with("/weak.dll"))
            .unwrap();
        let mut uids: Vec<_> = weak.findings.iter().map(|f| f.uid.as_str()).collect();
        uids.sort_unstable();
        assert_eq!(uids, vec!["PE019", "PE056"]);

        let truncated = summary
            .snapshot
            .entities
            .iter()
            .find(|e| e.path.ends_with("/truncated.sys"))
            .unwrap();
        assert!(truncated.findings.is_empty());
        assert_eq!(truncated.messages[0].message_id, messages::GENERATOR_EXCEPTION);

        assert!(!summary.snapshot.entities.iter().any(|e| e.path.ends_with("/good.exe")));
        assert_eq!(summary.entity_issues, 2);
    }
}
