//! Header flag checks.

use std::collections::HashMap;

use valentine_core::report::{NamedArg, ReportCategory, ReportDescriptor, ReportLevel};
use valentine_core::rule::{Rule, RuleReporter};
use valentine_core::{BoxError, Dependency, DependencyValues, RuleClass};

use crate::header::{characteristics, dll_characteristics, PeHeaders};
use crate::info::{BasicPeInfo, BASIC_PE_INFO, PE_HEADERS};
use crate::PE;

/// 64-bit image not large address aware.
pub const NOT_LARGE_ADDRESS_AWARE: ReportDescriptor =
    ReportDescriptor::new("PE016", ReportCategory::Security, ReportLevel::Warning);
/// 64-bit image neither large address aware nor high-entropy ASLR compatible.
pub const NOT_LARGE_ADDRESS_AWARE_NO_HIGH_ENTROPY_VA: ReportDescriptor =
    ReportDescriptor::new("PE018", ReportCategory::Security, ReportLevel::Warning);
/// Data execution prevention disabled.
pub const DEP_DISABLED: ReportDescriptor =
    ReportDescriptor::new("PE019", ReportCategory::Security, ReportLevel::Critical);
/// Dynamic image base disabled.
pub const DYNAMIC_BASE_DISABLED: ReportDescriptor =
    ReportDescriptor::new("PE056", ReportCategory::Security, ReportLevel::Error);
/// 64-bit image without high-entropy ASLR.
pub const NO_HIGH_ENTROPY_VA: ReportDescriptor =
    ReportDescriptor::new("PE057", ReportCategory::Security, ReportLevel::Warning);

/// Short titles of the reports above, keyed by uid.
#[must_use]
pub fn report_titles() -> HashMap<String, String> {
    [
        (NOT_LARGE_ADDRESS_AWARE, "Not marked as large address aware"),
        (
            NOT_LARGE_ADDRESS_AWARE_NO_HIGH_ENTROPY_VA,
            "High entropy ASLR compatibility disabled, not large address aware",
        ),
        (DEP_DISABLED, "DEP disabled"),
        (DYNAMIC_BASE_DISABLED, "Dynamic base is disabled"),
        (NO_HIGH_ENTROPY_VA, "High entropy ASLR compatibility disabled"),
    ]
    .into_iter()
    .map(|(report, title)| (report.uid.to_owned(), title.to_owned()))
    .collect()
}

/// Checks DEP, dynamic base and the 64-bit address space flags.
pub struct SimpleFlagsRule;

impl SimpleFlagsRule {
    fn check_high_entropy_va(reporter: &RuleReporter<'_>, headers: &PeHeaders, info: &BasicPeInfo) {
        if !info.is_executable || info.loads_as_32bit || !info.has_executable_code || info.is_boot {
            return;
        }

        let large_address_aware = headers.has_characteristics(characteristics::LARGE_ADDRESS_AWARE);
        let high_entropy_va = headers.has_dll_characteristics(dll_characteristics::HIGH_ENTROPY_VA);
        let report = match (large_address_aware, high_entropy_va) {
            (false, false) => &NOT_LARGE_ADDRESS_AWARE_NO_HIGH_ENTROPY_VA,
            (true, false) => &NO_HIGH_ENTROPY_VA,
            (false, true) => &NOT_LARGE_ADDRESS_AWARE,
            (true, true) => return,
        };
        reporter.log(report, &[]);
    }

    fn check_dep(reporter: &RuleReporter<'_>, headers: &PeHeaders, info: &BasicPeInfo) {
        if info.is_xbox
            || !info.is_executable
            || !info.has_executable_code
            || info.is_pre_win7ce
            || info.is_boot
        {
            return;
        }
        if !headers.has_dll_characteristics(dll_characteristics::NX_COMPAT) {
            reporter.log(&DEP_DISABLED, &[]);
        }
    }

    fn check_dynamic_base(reporter: &RuleReporter<'_>, headers: &PeHeaders, info: &BasicPeInfo) {
        if !info.has_executable_code || info.is_boot || info.is_pre_win7ce || info.is_xbox {
            return;
        }
        if !headers.has_dll_characteristics(dll_characteristics::DYNAMIC_BASE) {
            reporter.log(
                &DYNAMIC_BASE_DISABLED,
                &[NamedArg::new("image_base", headers.image_base)],
            );
        }
    }
}

impl Rule for SimpleFlagsRule {
    fn name(&self) -> &str {
        "pe_simple_flags_rule"
    }

    fn rule_class(&self) -> RuleClass {
        PE
    }

    fn reports(&self) -> &[ReportDescriptor] {
        const REPORTS: &[ReportDescriptor] = &[
            NOT_LARGE_ADDRESS_AWARE,
            NOT_LARGE_ADDRESS_AWARE_NO_HIGH_ENTROPY_VA,
            NO_HIGH_ENTROPY_VA,
            DEP_DISABLED,
            DYNAMIC_BASE_DISABLED,
        ];
        REPORTS
    }

    fn dependencies(&self) -> &[Dependency] {
        const DEPS: &[Dependency] = &[
            Dependency::required(PE_HEADERS),
            Dependency::required(BASIC_PE_INFO),
        ];
        DEPS
    }

    fn run(&self, reporter: &RuleReporter<'_>, deps: &DependencyValues) -> Result<(), BoxError> {
        let headers = deps.require::<PeHeaders>(PE_HEADERS)?;
        let info = deps.require::<BasicPeInfo>(BASIC_PE_INFO)?;
        Self::check_high_entropy_va(reporter, headers, info);
        Self::check_dep(reporter, headers, info);
        Self::check_dynamic_base(reporter, headers, info);
        Ok(())
    }
}
