//! Remote export-table resolution.
//!
//! Walks the PE header chain and export directory of a module mapped in
//! another process, reading every field through the process-memory port.
//! `GetProcAddress` is useless here: when a 64-bit injector targets a WOW64
//! process the two sides do not share module addresses, so the resolver
//! works purely from the documented on-disk offsets and never aliases a
//! local struct over remote bytes.

use log::debug;

use crate::errors::{ReadError, ResolveError};

/// Read access to another process's address space.
///
/// Implementations must return exactly `len` bytes or an error; a short
/// read is an error, never a truncated buffer.
pub trait ProcessMemory {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, ReadError>;
}

/// Offset of `e_lfanew` inside the DOS header.
const DOS_LFANEW_OFFSET: usize = 0x3C;
/// DOS header prefix large enough to contain `e_lfanew`.
const DOS_PREFIX_LEN: usize = 0x40;
/// Window read at `base + e_lfanew`: signature, file header, and either
/// optional-header layout up to the data directories.
const NT_WINDOW_LEN: usize = 0x100;
/// "PE\0\0"
const PE_SIGNATURE: u32 = 0x0000_4550;
/// Optional header starts after the 4-byte signature and 20-byte file header.
const OPTIONAL_HEADER_OFFSET: usize = 0x18;
const PE32_MAGIC: u16 = 0x10B;
const PE32PLUS_MAGIC: u16 = 0x20B;
/// Export data-directory entry offset within the optional header.
const PE32_EXPORT_DIR_OFFSET: usize = 96;
const PE32PLUS_EXPORT_DIR_OFFSET: usize = 112;
const EXPORT_DIRECTORY_LEN: usize = 40;
/// Upper bound for a single exported-name read.
const MAX_NAME_LEN: usize = 128;

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ResolveError> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ResolveError::Decode("field outside buffer"))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ResolveError> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ResolveError::Decode("field outside buffer"))
}

/// Finds `symbol` in the export table of the image mapped at `image_base`
/// inside the target, returning its absolute address there.
///
/// `Ok(None)` means the image exports nothing or the name is absent, both
/// legitimate states. Any failed read or structural mismatch aborts the
/// walk; no partial buffer is ever interpreted.
pub fn find_remote_export<M: ProcessMemory>(
    mem: &M,
    image_base: u64,
    symbol: &str,
) -> Result<Option<u64>, ResolveError> {
    let dos = mem.read_memory(image_base, DOS_PREFIX_LEN)?;
    let e_lfanew = u64::from(read_u32(&dos, DOS_LFANEW_OFFSET)?);

    let nt = mem.read_memory(image_base + e_lfanew, NT_WINDOW_LEN)?;
    if read_u32(&nt, 0)? != PE_SIGNATURE {
        return Err(ResolveError::Decode("missing PE signature"));
    }

    let magic = read_u16(&nt, OPTIONAL_HEADER_OFFSET)?;
    let export_dir_field = match magic {
        PE32_MAGIC => OPTIONAL_HEADER_OFFSET + PE32_EXPORT_DIR_OFFSET,
        PE32PLUS_MAGIC => OPTIONAL_HEADER_OFFSET + PE32PLUS_EXPORT_DIR_OFFSET,
        _ => return Err(ResolveError::Decode("unrecognized optional-header magic")),
    };

    let export_rva = u64::from(read_u32(&nt, export_dir_field)?);
    if export_rva == 0 {
        // The image exports nothing.
        return Ok(None);
    }

    let dir = mem.read_memory(image_base + export_rva, EXPORT_DIRECTORY_LEN)?;
    let function_count = read_u32(&dir, 20)? as usize;
    let name_count = read_u32(&dir, 24)? as usize;
    let functions_rva = u64::from(read_u32(&dir, 28)?);
    let names_rva = u64::from(read_u32(&dir, 32)?);
    let ordinals_rva = u64::from(read_u32(&dir, 36)?);

    debug!("export directory at {export_rva:#x}: {name_count} names, {function_count} functions");

    let name_ptrs = mem.read_memory(image_base + names_rva, name_count * 4)?;
    let ordinals = mem.read_memory(image_base + ordinals_rva, name_count * 2)?;
    let functions = mem.read_memory(image_base + functions_rva, function_count * 4)?;

    for i in 0..name_count {
        let name_rva = u64::from(read_u32(&name_ptrs, i * 4)?);
        let raw = mem.read_memory(image_base + name_rva, MAX_NAME_LEN)?;
        let name = &raw[..raw.iter().position(|&b| b == 0).unwrap_or(raw.len())];
        if name == symbol.as_bytes() {
            // Names index the ordinal table; ordinals index the function table.
            let ordinal = read_u16(&ordinals, i * 2)? as usize;
            let function_rva = u64::from(read_u32(&functions, ordinal * 4)?);
            return Ok(Some(image_base + function_rva));
        }
    }

    Ok(None)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::ProcessMemory;
    use crate::errors::ReadError;

    pub const E_LFANEW: u32 = 0x80;
    pub const EXPORT_DIR_RVA: u32 = 0x200;
    const FUNCTIONS_RVA: u32 = 0x240;
    const NAMES_RVA: u32 = 0x2C0;
    const ORDINALS_RVA: u32 = 0x340;
    const STRINGS_RVA: u32 = 0x380;
    const IMAGE_LEN: usize = 0x600;

    fn put_u16(img: &mut [u8], offset: usize, value: u16) {
        img[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(img: &mut [u8], offset: usize, value: u32) {
        img[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Lays out a minimal in-memory image: DOS header, header chain at
    /// `E_LFANEW`, and an export directory whose ordinal table is reversed
    /// relative to name order, so a resolver that skips the ordinal
    /// indirection returns wrong addresses.
    pub fn build_image(
        magic: u16,
        pe_signature: u32,
        export_rva: u32,
        exports: &[(&str, u32)],
    ) -> Vec<u8> {
        let mut img = vec![0u8; IMAGE_LEN];
        img[0] = b'M';
        img[1] = b'Z';
        put_u32(&mut img, 0x3C, E_LFANEW);

        let nt = E_LFANEW as usize;
        put_u32(&mut img, nt, pe_signature);
        let opt = nt + 0x18;
        put_u16(&mut img, opt, magic);
        let dir_field = opt + if magic == 0x20B { 112 } else { 96 };
        put_u32(&mut img, dir_field, export_rva);
        if export_rva == 0 {
            return img;
        }

        let n = exports.len();
        let dir = export_rva as usize;
        put_u32(&mut img, dir + 20, n as u32);
        put_u32(&mut img, dir + 24, n as u32);
        put_u32(&mut img, dir + 28, FUNCTIONS_RVA);
        put_u32(&mut img, dir + 32, NAMES_RVA);
        put_u32(&mut img, dir + 36, ORDINALS_RVA);

        let mut string_at = STRINGS_RVA as usize;
        for (i, (name, function_rva)) in exports.iter().enumerate() {
            let ordinal = (n - 1 - i) as u16;
            put_u32(&mut img, NAMES_RVA as usize + i * 4, string_at as u32);
            put_u16(&mut img, ORDINALS_RVA as usize + i * 2, ordinal);
            put_u32(&mut img, FUNCTIONS_RVA as usize + usize::from(ordinal) * 4, *function_rva);
            img[string_at..string_at + name.len()].copy_from_slice(name.as_bytes());
            string_at += name.len() + 1;
        }
        img
    }

    /// A remote image served from a local buffer. Records every read and can
    /// fail the Nth one to simulate a truncated or unreadable region.
    pub struct FakeMemory {
        pub base: u64,
        pub image: Vec<u8>,
        pub reads: RefCell<Vec<(u64, usize)>>,
        pub fail_on_read: Option<usize>,
    }

    impl FakeMemory {
        pub fn new(base: u64, image: Vec<u8>) -> Self {
            Self { base, image, reads: RefCell::new(Vec::new()), fail_on_read: None }
        }

        pub fn read_count(&self) -> usize {
            self.reads.borrow().len()
        }
    }

    impl ProcessMemory for FakeMemory {
        fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, ReadError> {
            let index = {
                let mut reads = self.reads.borrow_mut();
                reads.push((addr, len));
                reads.len() - 1
            };
            if self.fail_on_read == Some(index) {
                return Err(ReadError { addr, len });
            }
            let start = addr
                .checked_sub(self.base)
                .filter(|&s| s <= usize::MAX as u64)
                .ok_or(ReadError { addr, len })? as usize;
            self.image
                .get(start..start.checked_add(len).ok_or(ReadError { addr, len })?)
                .map(<[u8]>::to_vec)
                .ok_or(ReadError { addr, len })
        }
    }
}
