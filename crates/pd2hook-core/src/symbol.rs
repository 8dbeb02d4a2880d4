//! Typed function-pointer slots for symbols located at runtime.
//!
//! A [`FunctionSlot`] starts out empty (NULL) and is written once, either by
//! [`SignatureRegistry`](crate::signature::SignatureRegistry) during the search
//! pass or directly from a known function. The function-pointer type `F`
//! carries the parameter/return types and the calling convention; the only
//! place where an integer address becomes an `F` is [`FnPtr::from_address`].
//!
//! ```ignore
//! static LUA_CALL: FunctionSlot<unsafe extern "C" fn(*mut LuaState, i32, i32)> =
//!     FunctionSlot::new("lua_call");
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Calling convention of a function-pointer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallConv {
    Rust,
    C,
    System,
}

mod sealed {
    pub trait Sealed {}
}

/// Function-pointer types that can live in a [`FunctionSlot`].
///
/// Implemented for `fn`, `extern "C" fn` and `extern "system" fn` (and their
/// `unsafe` variants) with up to six parameters.
pub trait FnPtr: sealed::Sealed + Copy + Send + Sync + 'static {
    const CALL_CONV: CallConv;
    const ARITY: usize;

    fn to_address(self) -> usize;

    /// # Safety
    ///
    /// `address` must be non-zero and point at executable code with the
    /// signature and calling convention of `Self`.
    unsafe fn from_address(address: usize) -> Self;
}

macro_rules! impl_fn_ptr {
    (@one $conv:expr, $arity:literal, $ty:ty; $($arg:ident),*) => {
        impl<Ret: 'static, $($arg: 'static),*> sealed::Sealed for $ty {}

        impl<Ret: 'static, $($arg: 'static),*> FnPtr for $ty {
            const CALL_CONV: CallConv = $conv;
            const ARITY: usize = $arity;

            fn to_address(self) -> usize {
                self as usize
            }

            unsafe fn from_address(address: usize) -> Self {
                debug_assert_ne!(address, 0);
                // SAFETY: function pointers are address-sized; the caller
                // guarantees the address is a function of this type.
                unsafe { std::mem::transmute_copy::<usize, Self>(&address) }
            }
        }
    };
    ($arity:literal; $($arg:ident),*) => {
        impl_fn_ptr!(@one CallConv::Rust, $arity, fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one CallConv::Rust, $arity, unsafe fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one CallConv::C, $arity, extern "C" fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one CallConv::C, $arity, unsafe extern "C" fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one CallConv::System, $arity, extern "system" fn($($arg),*) -> Ret; $($arg),*);
        impl_fn_ptr!(@one CallConv::System, $arity, unsafe extern "system" fn($($arg),*) -> Ret; $($arg),*);
    };
}

impl_fn_ptr!(0;);
impl_fn_ptr!(1; A1);
impl_fn_ptr!(2; A1, A2);
impl_fn_ptr!(3; A1, A2, A3);
impl_fn_ptr!(4; A1, A2, A3, A4);
impl_fn_ptr!(5; A1, A2, A3, A4, A5);
impl_fn_ptr!(6; A1, A2, A3, A4, A5, A6);

/// A write-once target for a resolved address, as seen by the registry.
pub trait SlotTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Current address, `None` while unresolved.
    fn address(&self) -> Option<usize>;

    /// Store `address` if the slot is still empty. Returns `false` when the
    /// slot was already resolved or `address` is zero.
    fn resolve(&self, address: usize) -> bool;
}

impl<T: SlotTarget + ?Sized> SlotTarget for &'static T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn address(&self) -> Option<usize> {
        (**self).address()
    }

    fn resolve(&self, address: usize) -> bool {
        (**self).resolve(address)
    }
}

fn store_once(cell: &AtomicUsize, address: usize) -> bool {
    address != 0
        && cell
            .compare_exchange(0, address, Ordering::Release, Ordering::Relaxed)
            .is_ok()
}

fn load_address(cell: &AtomicUsize) -> Option<usize> {
    match cell.load(Ordering::Acquire) {
        0 => None,
        address => Some(address),
    }
}

/// A typed, write-once function-pointer slot.
pub struct FunctionSlot<F: FnPtr> {
    name: &'static str,
    address: AtomicUsize,
    detoured: AtomicBool,
    _marker: PhantomData<F>,
}

impl<F: FnPtr> FunctionSlot<F> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            address: AtomicUsize::new(0),
            detoured: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// A slot already holding a known function.
    pub fn with_function(name: &'static str, function: F) -> Self {
        let slot = Self::new(name);
        slot.address.store(function.to_address(), Ordering::Release);
        slot
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn call_conv(&self) -> CallConv {
        F::CALL_CONV
    }

    pub fn arity(&self) -> usize {
        F::ARITY
    }

    pub fn address(&self) -> Option<usize> {
        load_address(&self.address)
    }

    pub fn is_resolved(&self) -> bool {
        self.address().is_some()
    }

    /// The function currently stored in the slot.
    ///
    /// # Safety
    ///
    /// The resolved address must really be a function of type `F`. Addresses
    /// produced by a signature search are only as trustworthy as the
    /// signature that found them.
    pub unsafe fn get(&self) -> Option<F> {
        // SAFETY: forwarded to the caller.
        self.address()
            .map(|address| unsafe { F::from_address(address) })
    }

    /// Like [`get`](Self::get), failing with [`Error::UnresolvedSlot`] when empty.
    ///
    /// # Safety
    ///
    /// Same contract as [`get`](Self::get).
    pub unsafe fn require(&self) -> Result<F> {
        // SAFETY: forwarded to the caller.
        unsafe { self.get() }.ok_or_else(|| Error::UnresolvedSlot(self.name.to_string()))
    }

    /// Replace the stored address, returning the previous one.
    pub(crate) fn swap(&self, address: usize) -> usize {
        self.address.swap(address, Ordering::AcqRel)
    }

    /// Mark the slot as carrying an active detour. Returns `false` when one
    /// is already active.
    pub(crate) fn claim_detour(&self) -> bool {
        self.detoured
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_detour(&self) {
        self.detoured.store(false, Ordering::Release);
    }
}

impl<F: FnPtr> SlotTarget for FunctionSlot<F> {
    fn name(&self) -> &str {
        self.name
    }

    fn address(&self) -> Option<usize> {
        load_address(&self.address)
    }

    fn resolve(&self, address: usize) -> bool {
        store_once(&self.address, address)
    }
}

impl<F: FnPtr> fmt::Debug for FunctionSlot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSlot")
            .field("name", &self.name)
            .field("call_conv", &F::CALL_CONV)
            .field("address", &format_args!("{:#x}", self.address.load(Ordering::Acquire)))
            .finish()
    }
}

/// An untyped address slot, for signatures loaded from data files where no
/// function type is known.
#[derive(Debug)]
pub struct AddressSlot {
    name: String,
    address: AtomicUsize,
}

impl AddressSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: AtomicUsize::new(0),
        }
    }
}

impl SlotTarget for AddressSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<usize> {
        load_address(&self.address)
    }

    fn resolve(&self, address: usize) -> bool {
        store_once(&self.address, address)
    }
}

/// Shared handle to a registry target.
#[derive(Clone)]
pub struct SlotHandle(Arc<dyn SlotTarget>);

impl SlotHandle {
    pub fn new(target: Arc<dyn SlotTarget>) -> Self {
        Self(target)
    }
}

impl std::ops::Deref for SlotHandle {
    type Target = dyn SlotTarget;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotHandle").field(&self.0.name()).finish()
    }
}

impl<F: FnPtr> From<&'static FunctionSlot<F>> for SlotHandle {
    fn from(slot: &'static FunctionSlot<F>) -> Self {
        Self(Arc::new(slot))
    }
}

impl From<Arc<AddressSlot>> for SlotHandle {
    fn from(slot: Arc<AddressSlot>) -> Self {
        Self(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add_one(x: i32) -> i32 {
        x + 1
    }

    fn double(x: u64) -> u64 {
        x * 2
    }

    fn add_one_address() -> usize {
        (add_one as extern "C" fn(i32) -> i32).to_address()
    }

    fn double_address() -> usize {
        (double as fn(u64) -> u64).to_address()
    }

    #[test]
    fn test_new_slot_is_unresolved() {
        let slot: FunctionSlot<extern "C" fn(i32) -> i32> = FunctionSlot::new("add_one");
        assert!(!slot.is_resolved());
        assert_eq!(slot.address(), None);
        assert!(unsafe { slot.get() }.is_none());
        assert!(matches!(
            unsafe { slot.require() },
            Err(Error::UnresolvedSlot(name)) if name == "add_one"
        ));
    }

    #[test]
    fn test_with_function_round_trips() {
        let slot = FunctionSlot::with_function("add_one", add_one as extern "C" fn(i32) -> i32);
        assert_eq!(slot.address(), Some(add_one_address()));

        let f = unsafe { slot.require() }.unwrap();
        assert_eq!(f(41), 42);
    }

    #[test]
    fn test_resolve_is_write_once() {
        let slot: FunctionSlot<fn(u64) -> u64> = FunctionSlot::new("double");
        assert!(!slot.resolve(0));
        assert!(slot.resolve(double_address()));
        assert!(!slot.resolve(add_one_address()));
        assert_eq!(slot.address(), Some(double_address()));

        let f = unsafe { slot.get() }.unwrap();
        assert_eq!(f(21), 42);
    }

    #[test]
    fn test_call_conv_and_arity_tags() {
        let c: FunctionSlot<unsafe extern "C" fn(*mut u8, i32, i32) -> i32> =
            FunctionSlot::new("c");
        assert_eq!(c.call_conv(), CallConv::C);
        assert_eq!(c.arity(), 3);

        let sys: FunctionSlot<extern "system" fn()> = FunctionSlot::new("sys");
        assert_eq!(sys.call_conv(), CallConv::System);
        assert_eq!(sys.arity(), 0);

        let rust: FunctionSlot<fn(u8, u8, u8, u8, u8, u8) -> bool> = FunctionSlot::new("rust");
        assert_eq!(rust.call_conv(), CallConv::Rust);
        assert_eq!(rust.arity(), 6);
        assert_eq!(CallConv::System.to_string(), "system");
    }

    #[test]
    fn test_detour_claim_is_exclusive() {
        let slot = FunctionSlot::with_function("double", double as fn(u64) -> u64);
        assert!(slot.claim_detour());
        assert!(!slot.claim_detour());
        slot.release_detour();
        assert!(slot.claim_detour());
    }

    #[test]
    fn test_address_slot_through_handle() {
        let slot = Arc::new(AddressSlot::new("data"));
        let handle = SlotHandle::from(Arc::clone(&slot));
        assert_eq!(handle.name(), "data");
        assert!(handle.resolve(0x1000));
        assert!(!handle.resolve(0x2000));
        assert_eq!(slot.address(), Some(0x1000));
    }

    #[test]
    fn test_static_slot_through_handle() {
        static SLOT: FunctionSlot<fn(u64) -> u64> = FunctionSlot::new("static_double");
        let handle = SlotHandle::from(&SLOT);
        assert!(handle.resolve(double_address()));
        assert_eq!(SLOT.address(), Some(double_address()));
    }
}
