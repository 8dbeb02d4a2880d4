//! Writes to pointer-sized cells that may live in read-only pages
//! (vtables, import tables).

use crate::error::Result;

/// Store `value` into `cell`, temporarily lifting page protection.
///
/// # Safety
///
/// `cell` must be a valid, aligned, pointer-sized cell that nothing else
/// writes concurrently.
#[cfg(target_os = "windows")]
pub(crate) unsafe fn write_cell(cell: *mut usize, value: usize) -> Result<()> {
    use std::ffi::c_void;
    use tracing::warn;
    use windows::Win32::System::Memory::{PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect};

    use crate::error::Error;

    let size = std::mem::size_of::<usize>();
    let mut old_protect = PAGE_PROTECTION_FLAGS(0);

    // SAFETY: the caller guarantees `cell` is a mapped, pointer-sized cell.
    unsafe { VirtualProtect(cell as *const c_void, size, PAGE_READWRITE, &mut old_protect) }
        .map_err(|e| Error::ProtectFailed {
            address: cell as usize,
            message: e.to_string(),
        })?;

    // SAFETY: the page is writable now and the cell is valid per the caller.
    unsafe { std::ptr::write_volatile(cell, value) };

    let mut restored = PAGE_PROTECTION_FLAGS(0);
    // SAFETY: same region as above.
    if let Err(e) = unsafe { VirtualProtect(cell as *const c_void, size, old_protect, &mut restored) } {
        warn!(
            "Failed to restore protection at {:#x}: {}",
            cell as usize, e
        );
    }

    Ok(())
}

/// Store `value` into `cell`.
///
/// # Safety
///
/// `cell` must be a valid, aligned, writable pointer-sized cell that nothing
/// else writes concurrently.
#[cfg(not(target_os = "windows"))]
pub(crate) unsafe fn write_cell(cell: *mut usize, value: usize) -> Result<()> {
    // SAFETY: forwarded to the caller.
    unsafe { std::ptr::write_volatile(cell, value) };
    Ok(())
}
