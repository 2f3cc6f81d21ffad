//! Parsing of the DOS, file and optional headers of a PE image.
//!
//! Only the fields the built-in rules look at are decoded. Offsets follow
//! the PE/COFF layout; every read is bounds checked and a short buffer is a
//! [`HeaderError::Truncated`], never a panic.

use thiserror::Error;

/// Offset of `e_lfanew` in the DOS header.
const DOS_LFANEW_OFFSET: usize = 0x3c;
const FILE_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const DATA_DIRECTORY_SIZE: usize = 8;
const MAX_DATA_DIRECTORIES: u32 = 16;
/// Offset of the flags field in the CLR (COR20) header.
const COR20_FLAGS_OFFSET: usize = 16;

/// `IMAGE_FILE_*` characteristics.
pub mod characteristics {
    /// Relocation information was stripped.
    pub const RELOCS_STRIPPED: u16 = 0x0001;
    /// The image is executable.
    pub const EXECUTABLE_IMAGE: u16 = 0x0002;
    /// The image can handle addresses above 2 GiB.
    pub const LARGE_ADDRESS_AWARE: u16 = 0x0020;
    /// The image targets a 32-bit machine.
    pub const MACHINE_32BIT: u16 = 0x0100;
    /// The image is a DLL.
    pub const DLL: u16 = 0x2000;
}

/// `IMAGE_DLLCHARACTERISTICS_*` flags.
pub mod dll_characteristics {
    /// 64-bit address space layout randomization.
    pub const HIGH_ENTROPY_VA: u16 = 0x0020;
    /// The image can be relocated at load time.
    pub const DYNAMIC_BASE: u16 = 0x0040;
    /// The image is compatible with data execution prevention.
    pub const NX_COMPAT: u16 = 0x0100;
    /// The image is terminal server aware.
    pub const TERMINAL_SERVER_AWARE: u16 = 0x8000;
}

/// `IMAGE_SUBSYSTEM_*` values.
pub mod subsystem {
    /// Device drivers and native processes.
    pub const NATIVE: u16 = 1;
    /// Windows graphical interface.
    pub const WINDOWS_GUI: u16 = 2;
    /// Windows character mode.
    pub const WINDOWS_CUI: u16 = 3;
    /// Windows CE.
    pub const WINDOWS_CE_GUI: u16 = 9;
    /// EFI application.
    pub const EFI_APPLICATION: u16 = 10;
    /// EFI driver with boot services.
    pub const EFI_BOOT_SERVICE_DRIVER: u16 = 11;
    /// EFI driver with run-time services.
    pub const EFI_RUNTIME_DRIVER: u16 = 12;
    /// EFI ROM image.
    pub const EFI_ROM: u16 = 13;
    /// Xbox.
    pub const XBOX: u16 = 14;
    /// Windows boot application.
    pub const WINDOWS_BOOT_APPLICATION: u16 = 16;
}

/// `IMAGE_SCN_*` section flags.
pub mod section_flags {
    /// The section contains code.
    pub const CNT_CODE: u32 = 0x0000_0020;
    /// The section can be executed.
    pub const MEM_EXECUTE: u32 = 0x2000_0000;
}

/// `COMIMAGE_FLAGS_ILONLY`.
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;

/// Errors raised while parsing headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// The buffer does not start with `MZ`.
    #[error("missing DOS signature")]
    NoDosSignature,

    /// `e_lfanew` does not point at `PE\0\0`.
    #[error("missing PE signature at offset {0:#x}")]
    NoPeSignature(usize),

    /// The optional header is neither PE32 nor PE32+.
    #[error("unknown optional header magic {0:#x}")]
    UnknownMagic(u16),

    /// The buffer ends inside a header.
    #[error("{what} truncated at offset {offset:#x}")]
    Truncated {
        /// The structure being read.
        what: &'static str,
        /// Offset of the failed read.
        offset: usize,
    },
}

/// Optional header flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PE32 (`0x10b`).
    Pe32,
    /// PE32+ (`0x20b`).
    Pe64,
}

impl ImageFormat {
    fn from_magic(magic: u16) -> Result<Self, HeaderError> {
        match magic {
            0x10b => Ok(Self::Pe32),
            0x20b => Ok(Self::Pe64),
            other => Err(HeaderError::UnknownMagic(other)),
        }
    }
}

/// Index of a data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directory {
    /// Export table.
    Export = 0,
    /// Import table.
    Import = 1,
    /// Resource table.
    Resource = 2,
    /// Exception table.
    Exception = 3,
    /// Base relocations.
    BaseReloc = 5,
    /// Debug data.
    Debug = 6,
    /// Thread local storage.
    Tls = 9,
    /// Load configuration.
    LoadConfig = 10,
    /// Bound imports.
    BoundImport = 11,
    /// Delay-load imports.
    DelayImport = 13,
    /// CLR runtime header.
    ComDescriptor = 14,
}

/// One data directory entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    /// Relative virtual address; zero when absent.
    pub virtual_address: u32,
    /// Size in bytes.
    pub size: u32,
}

/// One section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Name, without trailing NULs.
    pub name: String,
    /// Size in memory.
    pub virtual_size: u32,
    /// Address in memory, relative to the image base.
    pub virtual_address: u32,
    /// Size in the file.
    pub size_of_raw_data: u32,
    /// Offset in the file.
    pub pointer_to_raw_data: u32,
    /// `IMAGE_SCN_*` flags.
    pub characteristics: u32,
}

impl SectionHeader {
    /// Returns `true` if the section holds code or is executable.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.characteristics & (section_flags::CNT_CODE | section_flags::MEM_EXECUTE) != 0
    }

    fn contains_rva(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && rva - self.virtual_address < extent
    }
}

/// The decoded headers of a PE image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeHeaders {
    /// PE32 or PE32+.
    pub format: ImageFormat,
    /// `IMAGE_FILE_MACHINE_*` value.
    pub machine: u16,
    /// `IMAGE_FILE_*` characteristics.
    pub characteristics: u16,
    /// Entry point RVA; zero when absent.
    pub address_of_entry_point: u32,
    /// Preferred load address.
    pub image_base: u64,
    /// Major operating system version.
    pub major_operating_system_version: u16,
    /// `IMAGE_SUBSYSTEM_*` value.
    pub subsystem: u16,
    /// `IMAGE_DLLCHARACTERISTICS_*` flags.
    pub dll_characteristics: u16,
    /// Data directories present in the optional header.
    pub directories: Vec<DataDirectory>,
    /// Section table.
    pub sections: Vec<SectionHeader>,
    /// Flags of the CLR header, for managed images whose header is readable.
    pub cor20_flags: Option<u32>,
}

impl PeHeaders {
    /// Parses the headers at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] if a signature is missing or a header is cut short.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        let nt = nt_headers_offset(bytes)?;
        let file = nt + 4;
        let machine = u16_at(bytes, file, "file header")?;
        let number_of_sections = u16_at(bytes, file + 2, "file header")?;
        let size_of_optional_header = usize::from(u16_at(bytes, file + 16, "file header")?);
        let characteristics = u16_at(bytes, file + 18, "file header")?;

        let opt = file + FILE_HEADER_SIZE;
        let format = ImageFormat::from_magic(u16_at(bytes, opt, "optional header")?)?;
        let address_of_entry_point = u32_at(bytes, opt + 16, "optional header")?;
        let image_base = match format {
            ImageFormat::Pe32 => u64::from(u32_at(bytes, opt + 28, "optional header")?),
            ImageFormat::Pe64 => u64_at(bytes, opt + 24, "optional header")?,
        };
        let major_operating_system_version = u16_at(bytes, opt + 40, "optional header")?;
        let subsystem = u16_at(bytes, opt + 68, "optional header")?;
        let dll_characteristics = u16_at(bytes, opt + 70, "optional header")?;

        let (count_offset, directories_offset) = match format {
            ImageFormat::Pe32 => (92, 96),
            ImageFormat::Pe64 => (108, 112),
        };
        let count = u32_at(bytes, opt + count_offset, "optional header")?.min(MAX_DATA_DIRECTORIES);
        let mut directories = Vec::new();
        for index in 0..count as usize {
            let relative = directories_offset + index * DATA_DIRECTORY_SIZE;
            if relative + DATA_DIRECTORY_SIZE > size_of_optional_header {
                break;
            }
            directories.push(DataDirectory {
                virtual_address: u32_at(bytes, opt + relative, "data directories")?,
                size: u32_at(bytes, opt + relative + 4, "data directories")?,
            });
        }

        let table = opt + size_of_optional_header;
        let sections = (0..usize::from(number_of_sections))
            .map(|index| section_at(bytes, table + index * SECTION_HEADER_SIZE))
            .collect::<Result<Vec<_>, _>>()?;

        let mut headers = Self {
            format,
            machine,
            characteristics,
            address_of_entry_point,
            image_base,
            major_operating_system_version,
            subsystem,
            dll_characteristics,
            directories,
            sections,
            cor20_flags: None,
        };
        headers.cor20_flags = headers
            .directory(Directory::ComDescriptor)
            .and_then(|clr| headers.rva_to_offset(clr.virtual_address))
            .and_then(|offset| u32_at(bytes, offset + COR20_FLAGS_OFFSET, "CLR header").ok());
        Ok(headers)
    }

    /// The entry of `directory`, if it is present and non-empty.
    #[must_use]
    pub fn directory(&self, directory: Directory) -> Option<&DataDirectory> {
        self.directories
            .get(directory as usize)
            .filter(|entry| entry.virtual_address != 0)
    }

    /// Returns `true` if `directory` is present.
    #[must_use]
    pub fn has_directory(&self, directory: Directory) -> bool {
        self.directory(directory).is_some()
    }

    /// Returns `true` if any of `flags` is set in the file characteristics.
    #[must_use]
    pub fn has_characteristics(&self, flags: u16) -> bool {
        self.characteristics & flags != 0
    }

    /// Returns `true` if any of `flags` is set in the DLL characteristics.
    #[must_use]
    pub fn has_dll_characteristics(&self, flags: u16) -> bool {
        self.dll_characteristics & flags != 0
    }

    /// Maps an RVA to a file offset through the section table.
    #[must_use]
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let section = self.sections.iter().find(|s| s.contains_rva(rva))?;
        let offset = section.pointer_to_raw_data.checked_add(rva - section.virtual_address)?;
        usize::try_from(offset).ok()
    }
}

/// Checks the DOS and PE signatures and the optional header magic.
///
/// Returns `None` for anything that is not a PE image.
#[must_use]
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    let nt = nt_headers_offset(bytes).ok()?;
    let magic = u16_at(bytes, nt + 4 + FILE_HEADER_SIZE, "optional header").ok()?;
    ImageFormat::from_magic(magic).ok()
}

fn nt_headers_offset(bytes: &[u8]) -> Result<usize, HeaderError> {
    if bytes.get(..2) != Some(b"MZ".as_slice()) {
        return Err(HeaderError::NoDosSignature);
    }
    let nt = u32_at(bytes, DOS_LFANEW_OFFSET, "DOS header")? as usize;
    if read::<4>(bytes, nt, "PE signature")? != *b"PE\0\0" {
        return Err(HeaderError::NoPeSignature(nt));
    }
    Ok(nt)
}

fn section_at(bytes: &[u8], offset: usize) -> Result<SectionHeader, HeaderError> {
    let raw_name = read::<8>(bytes, offset, "section table")?;
    let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
    Ok(SectionHeader {
        name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
        virtual_size: u32_at(bytes, offset + 8, "section table")?,
        virtual_address: u32_at(bytes, offset + 12, "section table")?,
        size_of_raw_data: u32_at(bytes, offset + 16, "section table")?,
        pointer_to_raw_data: u32_at(bytes, offset + 20, "section table")?,
        characteristics: u32_at(bytes, offset + 36, "section table")?,
    })
}

fn read<const N: usize>(bytes: &[u8], offset: usize, what: &'static str) -> Result<[u8; N], HeaderError> {
    offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(HeaderError::Truncated { what, offset })
}

fn u16_at(bytes: &[u8], offset: usize, what: &'static str) -> Result<u16, HeaderError> {
    read::<2>(bytes, offset, what).map(u16::from_le_bytes)
}

fn u32_at(bytes: &[u8], offset: usize, what: &'static str) -> Result<u32, HeaderError> {
    read::<4>(bytes, offset, what).map(u32::from_le_bytes)
}

fn u64_at(bytes: &[u8], offset: usize, what: &'static str) -> Result<u64, HeaderError> {
    read::<8>(bytes, offset, what).map(u64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ImageSpec;

    #[test]
    fn parses_pe32_headers() {
        let bytes = ImageSpec::default().build();
        let headers = PeHeaders::parse(&bytes).unwrap();

        assert_eq!(headers.format, ImageFormat::Pe32);
        assert_eq!(headers.machine, 0x14c);
        assert_eq!(headers.image_base, 0x40_0000);
        assert_eq!(headers.address_of_entry_point, 0x1000);
        assert_eq!(headers.subsystem, subsystem::WINDOWS_GUI);
        assert!(headers.has_characteristics(characteristics::EXECUTABLE_IMAGE));
        assert!(headers.has_dll_characteristics(dll_characteristics::NX_COMPAT));
        assert_eq!(headers.directories.len(), 16);
        assert_eq!(headers.sections.len(), 1);
        assert_eq!(headers.sections[0].name, ".text");
        assert!(headers.sections[0].is_executable());
        assert_eq!(headers.cor20_flags, None);
    }

    #[test]
    fn parses_pe64_image_base_and_clr_flags() {
        let spec = ImageSpec {
            pe64: true,
            image_base: 0x1_4000_0000,
            clr_flags: Some(COMIMAGE_FLAGS_ILONLY),
            ..ImageSpec::default()
        };
        let headers = PeHeaders::parse(&spec.build()).unwrap();

        assert_eq!(headers.format, ImageFormat::Pe64);
        assert_eq!(headers.machine, 0x8664);
        assert_eq!(headers.image_base, 0x1_4000_0000);
        assert!(headers.has_directory(Directory::ComDescriptor));
        assert_eq!(headers.cor20_flags, Some(COMIMAGE_FLAGS_ILONLY));
    }

    #[test]
    fn detect_format_distinguishes_flavors() {
        let pe32 = ImageSpec::default().build();
        let pe64 = ImageSpec {
            pe64: true,
            ..ImageSpec::default()
        }
        .build();
        assert_eq!(detect_format(&pe32), Some(ImageFormat::Pe32));
        assert_eq!(detect_format(&pe64), Some(ImageFormat::Pe64));
        assert_eq!(detect_format(b"MZ"), None);
        assert_eq!(detect_format(b"\x7fELF\x02\x01\x01"), None);
    }

    #[test]
    fn bad_signatures_are_errors() {
        assert_eq!(PeHeaders::parse(b"ZM...."), Err(HeaderError::NoDosSignature));

        let mut bytes = ImageSpec::default().build();
        bytes[0x80] = b'X';
        assert_eq!(PeHeaders::parse(&bytes), Err(HeaderError::NoPeSignature(0x80)));
    }

    #[test]
    fn truncated_section_table_is_an_error() {
        let bytes = ImageSpec::default().build();
        let err = PeHeaders::parse(&bytes[..0x190]).unwrap_err();
        assert!(matches!(err, HeaderError::Truncated { what: "section table", .. }), "{err}");
    }

    #[test]
    fn rva_outside_sections_has_no_offset() {
        let headers = PeHeaders::parse(&ImageSpec::default().build()).unwrap();
        assert_eq!(headers.rva_to_offset(0x1010), Some(0x410));
        assert_eq!(headers.rva_to_offset(0x9000), None);
    }
}
