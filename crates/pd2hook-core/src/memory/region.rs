//! Scannable code regions.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// A contiguous block of module memory that signatures are matched against.
pub trait CodeRegion {
    /// Address of the first byte of [`bytes`](Self::bytes).
    fn base_address(&self) -> usize;

    fn bytes(&self) -> &[u8];

    fn size(&self) -> usize {
        self.bytes().len()
    }

    fn contains(&self, address: usize) -> bool {
        address
            .checked_sub(self.base_address())
            .is_some_and(|offset| offset < self.size())
    }
}

/// Owned bytes presented as if mapped at `base_address`.
#[derive(Debug, Clone)]
pub struct BufferRegion {
    base_address: usize,
    data: Vec<u8>,
}

impl BufferRegion {
    pub fn new(base_address: usize, data: Vec<u8>) -> Self {
        Self { base_address, data }
    }

    /// Load a module image from disk for offline scanning.
    pub fn from_file<P: AsRef<Path>>(path: P, base_address: usize) -> Result<Self> {
        let data = fs::read(&path)?;
        debug!(
            "Loaded {} bytes from {:?} at base {:#x}",
            data.len(),
            path.as_ref(),
            base_address
        );
        Ok(Self::new(base_address, data))
    }
}

impl CodeRegion for BufferRegion {
    fn base_address(&self) -> usize {
        self.base_address
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// The image of a module loaded into the current process.
#[derive(Debug, Clone, Copy)]
pub struct HostModule {
    base_address: usize,
    size: usize,
}

impl HostModule {
    /// The main executable module of the current process.
    #[cfg(target_os = "windows")]
    pub fn current() -> Result<Self> {
        use windows::core::PCWSTR;

        Self::lookup(PCWSTR::null(), "<main module>")
    }

    /// A module of the current process by file name (e.g. `"lua51.dll"`).
    #[cfg(target_os = "windows")]
    pub fn named(name: &str) -> Result<Self> {
        use windows::core::HSTRING;

        let wide = HSTRING::from(name);
        Self::lookup(windows::core::PCWSTR(wide.as_ptr()), name)
    }

    #[cfg(target_os = "windows")]
    fn lookup(module_name: windows::core::PCWSTR, label: &str) -> Result<Self> {
        use windows::Win32::System::LibraryLoader::GetModuleHandleW;
        use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
        use windows::Win32::System::Threading::GetCurrentProcess;

        use crate::error::Error;

        // SAFETY: `module_name` is either null or a NUL-terminated wide string
        // that outlives this call.
        let module = unsafe { GetModuleHandleW(module_name) }
            .map_err(|e| Error::ModuleUnavailable(format!("{}: {}", label, e)))?;

        let mut info = MODULEINFO::default();
        // SAFETY: `info` is a properly sized, writable MODULEINFO.
        unsafe {
            GetModuleInformation(
                GetCurrentProcess(),
                module,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            )
        }
        .map_err(|e| Error::ModuleUnavailable(format!("{}: {}", label, e)))?;

        let region = Self {
            base_address: info.lpBaseOfDll as usize,
            size: info.SizeOfImage as usize,
        };
        debug!(
            "Module {}: base {:#x}, size {:#x}",
            label, region.base_address, region.size
        );
        Ok(region)
    }

    #[cfg(not(target_os = "windows"))]
    pub fn current() -> Result<Self> {
        Err(crate::error::Error::ModuleUnavailable(
            "host module lookup is only supported on Windows".to_string(),
        ))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn named(name: &str) -> Result<Self> {
        Err(crate::error::Error::ModuleUnavailable(format!(
            "{}: host module lookup is only supported on Windows",
            name
        )))
    }
}

impl CodeRegion for HostModule {
    fn base_address(&self) -> usize {
        self.base_address
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: a loaded module image stays mapped for the lifetime of the
        // process and `size` comes from the loader's own module information.
        unsafe { std::slice::from_raw_parts(self.base_address as *const u8, self.size) }
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_buffer_region_contains() {
        let region = BufferRegion::new(0x1000, vec![0; 0x10]);
        assert_eq!(region.size(), 0x10);
        assert!(region.contains(0x1000));
        assert!(region.contains(0x100F));
        assert!(!region.contains(0x1010));
        assert!(!region.contains(0xFFF));
    }

    #[test]
    fn test_buffer_region_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x55, 0x8B, 0xEC]).unwrap();

        let region = BufferRegion::from_file(file.path(), 0x400000).unwrap();
        assert_eq!(region.base_address(), 0x400000);
        assert_eq!(region.bytes(), &[0x55, 0x8B, 0xEC]);
    }

    #[test]
    fn test_buffer_region_missing_file() {
        let err = BufferRegion::from_file("does-not-exist.bin", 0).unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_host_module_unavailable_off_windows() {
        assert!(matches!(
            HostModule::current(),
            Err(crate::error::Error::ModuleUnavailable(_))
        ));
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_host_module_current() {
        let module = HostModule::current().unwrap();
        assert!(module.size() > 0);
        // PE images start with the "MZ" DOS header.
        assert_eq!(&module.bytes()[..2], b"MZ");
    }
}
