//! Synthetic PE images for tests.

use crate::header::{characteristics, dll_characteristics, section_flags, subsystem};

const LFANEW: usize = 0x80;
const HEADERS_SIZE: usize = 0x400;
const SECTION_RAW_SIZE: usize = 0x200;

/// Header fields of a generated image.
pub(crate) struct ImageSpec {
    pub pe64: bool,
    pub characteristics: u16,
    pub dll_characteristics: u16,
    pub subsystem: u16,
    pub image_base: u64,
    pub entry_point: u32,
    pub major_os_version: u16,
    pub sections: Vec<(&'static str, u32)>,
    /// Adds a CLR header with these flags in the first section.
    pub clr_flags: Option<u32>,
}

impl Default for ImageSpec {
    /// A well-behaved 32-bit GUI executable.
    fn default() -> Self {
        Self {
            pe64: false,
            characteristics: characteristics::EXECUTABLE_IMAGE,
            dll_characteristics: dll_characteristics::NX_COMPAT
                | dll_characteristics::DYNAMIC_BASE
                | dll_characteristics::TERMINAL_SERVER_AWARE,
            subsystem: subsystem::WINDOWS_GUI,
            image_base: 0x40_0000,
            entry_point: 0x1000,
            major_os_version: 6,
            sections: vec![(".text", section_flags::CNT_CODE | section_flags::MEM_EXECUTE)],
            clr_flags: None,
        }
    }
}

impl ImageSpec {
    /// A hardened 64-bit executable.
    pub fn hardened_pe64() -> Self {
        Self {
            pe64: true,
            characteristics: characteristics::EXECUTABLE_IMAGE
                | characteristics::LARGE_ADDRESS_AWARE,
            dll_characteristics: dll_characteristics::NX_COMPAT
                | dll_characteristics::DYNAMIC_BASE
                | dll_characteristics::HIGH_ENTROPY_VA
                | dll_characteristics::TERMINAL_SERVER_AWARE,
            image_base: 0x1_4000_0000,
            ..Self::default()
        }
    }

    /// Lays out the image: headers in the first 0x400 bytes, then one
    /// 0x200-byte raw block per section, mapped at 0x1000 steps.
    pub fn build(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADERS_SIZE + SECTION_RAW_SIZE * self.sections.len()];
        bytes[..2].copy_from_slice(b"MZ");
        put_u32(&mut bytes, 0x3c, LFANEW as u32);
        bytes[LFANEW..LFANEW + 4].copy_from_slice(b"PE\0\0");

        let file = LFANEW + 4;
        let (machine, magic, size_of_optional_header) = if self.pe64 {
            (0x8664, 0x20b, 112 + 16 * 8)
        } else {
            (0x14c, 0x10b, 96 + 16 * 8)
        };
        put_u16(&mut bytes, file, machine);
        put_u16(&mut bytes, file + 2, self.sections.len() as u16);
        put_u16(&mut bytes, file + 16, size_of_optional_header as u16);
        put_u16(&mut bytes, file + 18, self.characteristics);

        let opt = file + 20;
        put_u16(&mut bytes, opt, magic);
        put_u32(&mut bytes, opt + 16, self.entry_point);
        if self.pe64 {
            put_u64(&mut bytes, opt + 24, self.image_base);
        } else {
            put_u32(&mut bytes, opt + 28, self.image_base as u32);
        }
        put_u16(&mut bytes, opt + 40, self.major_os_version);
        put_u16(&mut bytes, opt + 68, self.subsystem);
        put_u16(&mut bytes, opt + 70, self.dll_characteristics);
        let (count_offset, directories_offset) = if self.pe64 { (108, 112) } else { (92, 96) };
        put_u32(&mut bytes, opt + count_offset, 16);

        let table = opt + size_of_optional_header;
        for (index, (name, flags)) in self.sections.iter().enumerate() {
            let header = table + index * 40;
            let raw = HEADERS_SIZE + index * SECTION_RAW_SIZE;
            bytes[header..header + name.len()].copy_from_slice(name.as_bytes());
            put_u32(&mut bytes, header + 8, SECTION_RAW_SIZE as u32);
            put_u32(&mut bytes, header + 12, 0x1000 * (index as u32 + 1));
            put_u32(&mut bytes, header + 16, SECTION_RAW_SIZE as u32);
            put_u32(&mut bytes, header + 20, raw as u32);
            put_u32(&mut bytes, header + 36, *flags);
        }

        if let Some(flags) = self.clr_flags {
            let clr_directory = opt + directories_offset + 14 * 8;
            put_u32(&mut bytes, clr_directory, 0x1000);
            put_u32(&mut bytes, clr_directory + 4, 72);
            put_u32(&mut bytes, HEADERS_SIZE, 72);
            put_u32(&mut bytes, HEADERS_SIZE + 16, flags);
        }
        bytes
    }
}

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
