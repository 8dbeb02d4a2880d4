//! Reversible redirection of a function-pointer slot.
//!
//! A [`Detour`] captures the value of a slot when it is built and installs
//! nothing until [`Detour::attach`]. [`Detour::detach`] writes the captured
//! value back; dropping an attached detour detaches it.
//!
//! ```ignore
//! let target = DetourTarget::from_slot(&LUA_CALL)?;
//! let mut detour = Detour::new(target, hooked_lua_call);
//! detour.attach()?;
//! // calls through LUA_CALL now reach hooked_lua_call
//! ```
//!
//! One thread owns the attach/detach lifecycle of a slot. Slot writes are
//! not synchronized with other writers.

use std::marker::PhantomData;
use std::ptr::NonNull;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::write_cell;
use crate::symbol::{FnPtr, FunctionSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum DetourState {
    Unattached,
    Attached,
}

enum Cell<'a, F: FnPtr> {
    Slot(&'a FunctionSlot<F>),
    Raw(NonNull<usize>, PhantomData<&'a mut F>),
}

/// Permission to rewrite one function-pointer cell.
///
/// Obtainable only from a resolved [`FunctionSlot`] or, unsafely, from a raw
/// pointer to a known table entry.
pub struct DetourTarget<'a, F: FnPtr> {
    cell: Cell<'a, F>,
}

impl<'a, F: FnPtr> DetourTarget<'a, F> {
    /// Target a resolved slot. Fails with [`Error::UnresolvedSlot`] when the
    /// slot is still empty.
    pub fn from_slot(slot: &'a FunctionSlot<F>) -> Result<Self> {
        if !slot.is_resolved() {
            return Err(Error::UnresolvedSlot(slot.name().to_string()));
        }
        Ok(Self {
            cell: Cell::Slot(slot),
        })
    }

    /// Target a raw function-pointer cell such as a vtable or import-table
    /// entry. Returns `None` for a null pointer or an empty cell.
    ///
    /// # Safety
    ///
    /// `cell` must point at a pointer-sized, aligned cell holding a function
    /// of type `F`, stay valid for `'a`, and be writable (page protection is
    /// lifted around each write on Windows).
    pub unsafe fn from_raw(cell: *mut F) -> Option<Self> {
        let cell = NonNull::new(cell.cast::<usize>())?;
        // SAFETY: the caller guarantees the cell is valid for reads.
        if unsafe { std::ptr::read_volatile(cell.as_ptr()) } == 0 {
            return None;
        }
        Some(Self {
            cell: Cell::Raw(cell, PhantomData),
        })
    }

    pub fn name(&self) -> String {
        match &self.cell {
            Cell::Slot(slot) => slot.name().to_string(),
            Cell::Raw(ptr, _) => format!("{:#x}", ptr.as_ptr() as usize),
        }
    }

    fn read(&self) -> usize {
        match &self.cell {
            Cell::Slot(slot) => slot.address().unwrap_or(0),
            // SAFETY: validity guaranteed by `from_raw`'s contract.
            Cell::Raw(ptr, _) => unsafe { std::ptr::read_volatile(ptr.as_ptr()) },
        }
    }

    fn write(&self, value: usize) -> Result<()> {
        match &self.cell {
            Cell::Slot(slot) => {
                slot.swap(value);
                Ok(())
            }
            // SAFETY: validity guaranteed by `from_raw`'s contract.
            Cell::Raw(ptr, _) => unsafe { write_cell(ptr.as_ptr(), value) },
        }
    }

    fn claim(&self) -> bool {
        match &self.cell {
            Cell::Slot(slot) => slot.claim_detour(),
            Cell::Raw(..) => true,
        }
    }

    fn release(&self) {
        if let Cell::Slot(slot) = &self.cell {
            slot.release_detour();
        }
    }
}

/// A scoped redirection of a slot from its original function to a replacement.
pub struct Detour<'a, F: FnPtr> {
    target: DetourTarget<'a, F>,
    original: usize,
    replacement: usize,
    state: DetourState,
}

impl<'a, F: FnPtr> Detour<'a, F> {
    /// Capture the current value of `target`. Nothing is written yet.
    pub fn new(target: DetourTarget<'a, F>, replacement: F) -> Self {
        let original = target.read();
        Self {
            target,
            original,
            replacement: replacement.to_address(),
            state: DetourState::Unattached,
        }
    }

    pub fn state(&self) -> DetourState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == DetourState::Attached
    }

    pub fn original_address(&self) -> usize {
        self.original
    }

    pub fn replacement_address(&self) -> usize {
        self.replacement
    }

    /// The function the slot held before this detour, for calling through
    /// from inside the replacement.
    ///
    /// # Safety
    ///
    /// Same contract as [`FunctionSlot::get`]: the captured address must be a
    /// function of type `F`.
    pub unsafe fn original(&self) -> F {
        // SAFETY: forwarded to the caller; the captured value is non-zero.
        unsafe { F::from_address(self.original) }
    }

    /// Point the slot at the replacement. No-op when already attached.
    ///
    /// Fails with [`Error::SlotBusy`] when another detour is active on the
    /// same [`FunctionSlot`].
    pub fn attach(&mut self) -> Result<()> {
        if self.is_attached() {
            return Ok(());
        }
        if !self.target.claim() {
            return Err(Error::SlotBusy(self.target.name()));
        }
        if let Err(e) = self.target.write(self.replacement) {
            self.target.release();
            return Err(e);
        }

        self.state = DetourState::Attached;
        debug!(
            "Detour attached on {}: {:#x} -> {:#x}",
            self.target.name(),
            self.original,
            self.replacement
        );
        Ok(())
    }

    /// Restore the original function. No-op when not attached.
    pub fn detach(&mut self) -> Result<()> {
        if !self.is_attached() {
            return Ok(());
        }

        self.target.write(self.original)?;
        self.target.release();
        self.state = DetourState::Unattached;
        debug!(
            "Detour detached from {}: restored {:#x}",
            self.target.name(),
            self.original
        );
        Ok(())
    }
}

impl<F: FnPtr> Drop for Detour<'_, F> {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!("Failed to detach detour on {}: {}", self.target.name(), e);
        }
    }
}
