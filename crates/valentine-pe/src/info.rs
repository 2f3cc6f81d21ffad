//! Generators turning the loaded image into header and summary values.

use std::path::Path;
use std::sync::Arc;

use valentine_core::entity::{SubjectEntity, ENTITY_TAG};
use valentine_core::generator::{GeneratedValues, Generator};
use valentine_core::value::make_value;
use valentine_core::{BoxError, Dependency, DependencyValues, RuleClassMask, ValueTag};

use crate::header::{
    characteristics, subsystem, Directory, ImageFormat, PeHeaders, COMIMAGE_FLAGS_ILONLY,
};

/// Raw image bytes (`Vec<u8>`), set by the format detector.
pub const IMAGE_DATA: ValueTag = ValueTag::new("pe.image_data");
/// Parsed [`PeHeaders`].
pub const PE_HEADERS: ValueTag = ValueTag::new("pe.headers");
/// Derived [`BasicPeInfo`].
pub const BASIC_PE_INFO: ValueTag = ValueTag::new("pe.basic_pe_info");

/// Facts about an image that many rules branch on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicPeInfo {
    /// Only resources, no code or imports.
    pub is_resource_only: bool,
    /// Xbox subsystem.
    pub is_xbox: bool,
    /// Windows CE before version 7.
    pub is_pre_win7ce: bool,
    /// EFI or boot application.
    pub is_boot: bool,
    /// Managed image without native code.
    pub is_il_only: bool,
    /// Managed image with native code.
    pub is_mixed: bool,
    /// Marked executable.
    pub is_executable: bool,
    /// Has a CLR header.
    pub is_managed: bool,
    /// Runs as a 32-bit process.
    pub loads_as_32bit: bool,
    /// Native subsystem.
    pub is_driver: bool,
    /// Has an entry point, imports or an executable section.
    pub has_executable_code: bool,
    /// `IMAGE_FILE_MACHINE_*` value.
    pub machine: u16,
    /// Lowercase file extension including the dot, or empty.
    pub file_extension: String,
    /// File name.
    pub file_name: String,
}

impl BasicPeInfo {
    /// Derives the summary of `headers` for the file at `path`.
    #[must_use]
    pub fn from_headers(headers: &PeHeaders, path: &Path) -> Self {
        let mut info = Self {
            machine: headers.machine,
            ..Self::default()
        };

        match headers.subsystem {
            subsystem::XBOX => info.is_xbox = true,
            subsystem::NATIVE => info.is_driver = true,
            subsystem::EFI_APPLICATION
            | subsystem::EFI_BOOT_SERVICE_DRIVER
            | subsystem::EFI_ROM
            | subsystem::EFI_RUNTIME_DRIVER
            | subsystem::WINDOWS_BOOT_APPLICATION => info.is_boot = true,
            subsystem::WINDOWS_CE_GUI => {
                info.is_pre_win7ce = headers.major_operating_system_version < 7;
            }
            _ => {}
        }

        let has_any = |dirs: &[Directory]| dirs.iter().any(|d| headers.has_directory(*d));
        info.is_resource_only = headers.has_directory(Directory::Resource)
            && !has_any(&[
                Directory::BoundImport,
                Directory::LoadConfig,
                Directory::Debug,
                Directory::DelayImport,
                Directory::Exception,
                Directory::Export,
                Directory::Import,
                Directory::Tls,
            ])
            && headers.address_of_entry_point == 0;

        if let Some(flags) = headers.cor20_flags {
            info.is_managed = true;
            if flags & COMIMAGE_FLAGS_ILONLY != 0 {
                info.is_il_only = true;
            } else {
                info.is_mixed = true;
            }
        }

        info.is_executable = headers.has_characteristics(characteristics::EXECUTABLE_IMAGE);
        info.loads_as_32bit = headers.format == ImageFormat::Pe32
            && (!info.is_managed || headers.has_characteristics(characteristics::MACHINE_32BIT));

        info.file_extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        info.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        info.has_executable_code = headers.address_of_entry_point != 0
            || has_any(&[Directory::BoundImport, Directory::DelayImport, Directory::Import])
            || headers.sections.iter().any(|s| s.is_executable());
        info
    }
}

/// Parses [`PE_HEADERS`] from [`IMAGE_DATA`].
pub struct PeHeadersGenerator;

impl Generator for PeHeadersGenerator {
    fn name(&self) -> &str {
        "pe_headers_generator"
    }

    fn produces(&self) -> &[ValueTag] {
        &[PE_HEADERS]
    }

    fn rule_classes(&self) -> RuleClassMask {
        RuleClassMask::empty().with(crate::PE)
    }

    fn dependencies(&self) -> &[Dependency] {
        const DEPS: &[Dependency] = &[Dependency::required(IMAGE_DATA)];
        DEPS
    }

    fn generate(&self, deps: &DependencyValues) -> Result<GeneratedValues, BoxError> {
        let data = deps.require::<Vec<u8>>(IMAGE_DATA)?;
        let headers = PeHeaders::parse(data)?;
        Ok(vec![Some(make_value(headers))])
    }
}

/// Derives [`BASIC_PE_INFO`] from the headers and the entity path.
pub struct BasicPeInfoGenerator;

impl Generator for BasicPeInfoGenerator {
    fn name(&self) -> &str {
        "basic_pe_info_generator"
    }

    fn produces(&self) -> &[ValueTag] {
        &[BASIC_PE_INFO]
    }

    fn rule_classes(&self) -> RuleClassMask {
        RuleClassMask::empty().with(crate::PE)
    }

    fn dependencies(&self) -> &[Dependency] {
        const DEPS: &[Dependency] = &[
            Dependency::required(PE_HEADERS),
            Dependency::required(ENTITY_TAG),
        ];
        DEPS
    }

    fn generate(&self, deps: &DependencyValues) -> Result<GeneratedValues, BoxError> {
        let headers = deps.require::<PeHeaders>(PE_HEADERS)?;
        let entity = deps.require::<Arc<dyn SubjectEntity>>(ENTITY_TAG)?;
        let info = BasicPeInfo::from_headers(headers, entity.path());
        Ok(vec![Some(make_value(info))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use valentine_core::entity::FileEntity;

    use crate::header::section_flags;
    use crate::test_support::ImageSpec;

    fn info_for(spec: &ImageSpec, path: &str) -> BasicPeInfo {
        let headers = PeHeaders::parse(&spec.build()).unwrap();
        BasicPeInfo::from_headers(&headers, Path::new(path))
    }

    #[test]
    fn native_pe32_executable() {
        let info = info_for(&ImageSpec::default(), "C:/bin/App.EXE");
        assert!(info.is_executable);
        assert!(info.loads_as_32bit);
        assert!(info.has_executable_code);
        assert!(!info.is_managed);
        assert_eq!(info.file_extension, ".exe");
        assert_eq!(info.file_name, "App.EXE");
    }

    #[test]
    fn managed_images_are_classified() {
        let il_only = ImageSpec {
            clr_flags: Some(COMIMAGE_FLAGS_ILONLY),
            ..ImageSpec::default()
        };
        let info = info_for(&il_only, "lib.dll");
        assert!(info.is_managed && info.is_il_only && !info.is_mixed);
        // AnyCPU managed PE32 images run as 64-bit where possible.
        assert!(!info.loads_as_32bit);

        let mixed = ImageSpec {
            clr_flags: Some(0),
            characteristics: characteristics::EXECUTABLE_IMAGE | characteristics::MACHINE_32BIT,
            ..ImageSpec::default()
        };
        let info = info_for(&mixed, "lib.dll");
        assert!(info.is_mixed && !info.is_il_only);
        assert!(info.loads_as_32bit);
    }

    #[test]
    fn subsystems_set_flags() {
        let boot = ImageSpec {
            subsystem: subsystem::EFI_APPLICATION,
            ..ImageSpec::default()
        };
        assert!(info_for(&boot, "boot.efi").is_boot);

        let old_ce = ImageSpec {
            subsystem: subsystem::WINDOWS_CE_GUI,
            major_os_version: 5,
            ..ImageSpec::default()
        };
        assert!(info_for(&old_ce, "app.exe").is_pre_win7ce);

        let driver = ImageSpec {
            subsystem: subsystem::NATIVE,
            ..ImageSpec::default()
        };
        assert!(info_for(&driver, "drv.sys").is_driver);
    }

    #[test]
    fn no_entry_point_and_no_code_section_means_no_code() {
        let data_only = ImageSpec {
            entry_point: 0,
            sections: vec![(".rsrc", 0x4000_0040)],
            ..ImageSpec::default()
        };
        assert!(!info_for(&data_only, "res.dll").has_executable_code);

        let code_section = ImageSpec {
            entry_point: 0,
            sections: vec![(".text", section_flags::MEM_EXECUTE)],
            ..ImageSpec::default()
        };
        assert!(info_for(&code_section, "res.dll").has_executable_code);
    }

    #[test]
    fn generators_chain_through_dependency_values() {
        let mut deps = DependencyValues::new();
        deps.push(IMAGE_DATA, Some(make_value(ImageSpec::hardened_pe64().build())));
        let headers = PeHeadersGenerator.generate(&deps).unwrap();

        let entity: Arc<dyn SubjectEntity> =
            Arc::new(FileEntity::new(PathBuf::from("tool.exe"), 0x600));
        let mut deps = DependencyValues::new();
        deps.push(PE_HEADERS, headers[0].clone());
        deps.push(ENTITY_TAG, Some(make_value(entity)));
        let info = BasicPeInfoGenerator.generate(&deps).unwrap();

        let info = info[0]
            .as_ref()
            .and_then(|value| value.downcast_ref::<BasicPeInfo>())
            .unwrap();
        assert!(!info.loads_as_32bit);
        assert_eq!(info.machine, 0x8664);
    }

    #[test]
    fn generators_only_run_on_pe_entities() {
        let pe = RuleClassMask::empty().with(crate::PE).with(crate::PE64);
        assert!(PeHeadersGenerator.rule_classes().intersects(pe));
        assert!(BasicPeInfoGenerator.rule_classes().intersects(pe));
        let foreign = RuleClassMask::empty().with(valentine_core::RuleClass::new(9));
        assert!(!PeHeadersGenerator.rule_classes().intersects(foreign));
    }

    #[test]
    fn garbage_image_fails_header_generation() {
        let mut deps = DependencyValues::new();
        deps.push(IMAGE_DATA, Some(make_value(b"MZ".to_vec())));
        assert!(PeHeadersGenerator.generate(&deps).is_err());
    }
}
