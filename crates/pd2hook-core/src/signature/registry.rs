//! Signature registry and the one-shot search pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Pattern, find_position};
use crate::error::{Error, Result};
use crate::memory::{CodeRegion, HostModule};
use crate::symbol::SlotHandle;

/// A pending request to locate a function by signature.
#[derive(Debug)]
pub struct SignatureRequest {
    pub name: String,
    pub pattern: Pattern,
    /// Displacement from the match start to the reported address
    pub offset: isize,
    pub target: SlotHandle,
}

/// Outcome of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureResolution {
    pub name: String,
    pub pattern: String,
    pub address: Option<usize>,
}

impl SignatureResolution {
    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }
}

/// Per-request results of a search, in registration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchReport {
    pub base_address: usize,
    pub size: usize,
    pub entries: Vec<SignatureResolution>,
}

impl SearchReport {
    pub fn get(&self, name: &str) -> Option<&SignatureResolution> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &SignatureResolution> {
        self.entries.iter().filter(|entry| entry.is_resolved())
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &SignatureResolution> {
        self.entries.iter().filter(|entry| !entry.is_resolved())
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved().count()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(SignatureResolution::is_resolved)
    }
}

/// Collects signature requests and resolves all of them in a single pass.
///
/// Requests are recorded with [`register`](Self::register) and scanned in
/// registration order by [`search`](Self::search). The search runs at most
/// once; a second call fails with [`Error::SearchAlreadyPerformed`] so that
/// slots already captured by a detour are never rewritten.
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    requests: Mutex<Vec<SignatureRequest>>,
    searched: AtomicBool,
    report: OnceLock<SearchReport>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Fails once the search has been performed.
    pub fn register(
        &self,
        name: impl Into<String>,
        target: impl Into<SlotHandle>,
        pattern: Pattern,
        offset: isize,
    ) -> Result<()> {
        let name = name.into();
        if self.is_searched() {
            warn!("Signature '{}' registered after search; ignoring", name);
            return Err(Error::SearchAlreadyPerformed);
        }

        debug!("Registered signature '{}': {} (offset {})", name, pattern, offset);
        self.lock().push(SignatureRequest {
            name,
            pattern,
            offset,
            target: target.into(),
        });
        Ok(())
    }

    /// Record a request given as raw bytes plus a parallel boolean mask.
    pub fn register_masked(
        &self,
        name: impl Into<String>,
        target: impl Into<SlotHandle>,
        signature: &[u8],
        mask: &[bool],
        offset: isize,
    ) -> Result<()> {
        let name = name.into();
        let pattern = Pattern::new(signature, mask).inspect_err(|e| {
            warn!("Rejected signature '{}': {}", name, e);
        })?;
        self.register(name, target, pattern, offset)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_searched(&self) -> bool {
        self.searched.load(Ordering::Acquire)
    }

    /// Report of the completed search, if any.
    pub fn report(&self) -> Option<&SearchReport> {
        self.report.get()
    }

    /// Resolve every request against the main module of the current process.
    pub fn search(&self) -> Result<SearchReport> {
        let module = HostModule::current()?;
        self.search_in(&module)
    }

    /// Resolve every request against `region`.
    ///
    /// Unmatched requests leave their slot empty and are logged; they never
    /// abort the pass.
    pub fn search_in<R: CodeRegion + ?Sized>(&self, region: &R) -> Result<SearchReport> {
        if self.searched.swap(true, Ordering::AcqRel) {
            return Err(Error::SearchAlreadyPerformed);
        }

        let requests = std::mem::take(&mut *self.lock());
        let base = region.base_address();
        let haystack = region.bytes();

        info!(
            "Searching {} signatures in module at {:#x} ({:#x} bytes)",
            requests.len(),
            base,
            haystack.len()
        );

        let mut report = SearchReport {
            base_address: base,
            size: haystack.len(),
            entries: Vec::with_capacity(requests.len()),
        };

        for request in requests {
            let address = resolve_request(&request, base, haystack);
            report.entries.push(SignatureResolution {
                name: request.name,
                pattern: request.pattern.to_string(),
                address,
            });
        }

        let resolved = report.resolved_count();
        if resolved == report.entries.len() {
            info!("Signature search complete: {}/{} resolved", resolved, resolved);
        } else {
            warn!(
                "Signature search complete: {}/{} resolved",
                resolved,
                report.entries.len()
            );
        }

        let _ = self.report.set(report.clone());
        Ok(report)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SignatureRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolve_request(request: &SignatureRequest, base: usize, haystack: &[u8]) -> Option<usize> {
    let Some(position) = find_position(haystack, &request.pattern) else {
        warn!("Signature '{}' not found", request.name);
        return None;
    };

    let address = base
        .wrapping_add(position)
        .wrapping_add_signed(request.offset);

    if !request.target.resolve(address) {
        warn!(
            "Signature '{}' matched at {:#x} but its slot was not written (already resolved: {:?})",
            request.name,
            address,
            request.target.address()
        );
        return None;
    }

    debug!("Signature '{}' resolved to {:#x}", request.name, address);
    Some(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferRegion;
    use crate::symbol::{AddressSlot, FunctionSlot, SlotTarget};
    use std::sync::Arc;

    fn region() -> BufferRegion {
        BufferRegion::new(
            0x40_0000,
            vec![
                0xCC, 0xCC, 0x55, 0x8B, 0xEC, 0x83, 0xEC, 0x10, // 0x00
                0xCC, 0xCC, 0xAA, 0x00, 0xCC, 0xAA, 0x11, 0xCC, // 0x08
                0xE8, 0x12, 0x34, 0x56, 0x78, 0xC3, 0xCC, 0xCC, // 0x10
            ],
        )
    }

    fn slot(name: &str) -> Arc<AddressSlot> {
        Arc::new(AddressSlot::new(name))
    }

    #[test]
    fn test_search_resolves_each_request() {
        let registry = SignatureRegistry::new();
        let prologue = slot("prologue");
        let call = slot("call");

        registry
            .register("prologue", Arc::clone(&prologue), "55 8B EC".parse().unwrap(), 0)
            .unwrap();
        registry
            .register("call", Arc::clone(&call), "E8 ?? ?? ?? ?? C3".parse().unwrap(), 1)
            .unwrap();
        assert_eq!(registry.len(), 2);

        let report = registry.search_in(&region()).unwrap();
        assert!(report.is_complete());
        assert_eq!(prologue.address(), Some(0x40_0002));
        assert_eq!(call.address(), Some(0x40_0011));
        assert_eq!(report.get("call").unwrap().address, Some(0x40_0011));
    }

    #[test]
    fn test_missing_signature_does_not_block_others() {
        let registry = SignatureRegistry::new();
        let missing = slot("missing");
        let present = slot("present");

        registry
            .register("missing", Arc::clone(&missing), "DE AD BE EF".parse().unwrap(), 0)
            .unwrap();
        registry
            .register_masked(
                "present",
                Arc::clone(&present),
                &[0xAA, 0x00, 0xCC],
                &[true, false, true],
                0,
            )
            .unwrap();

        let report = registry.search_in(&region()).unwrap();
        assert!(!report.is_complete());
        assert_eq!(missing.address(), None);
        assert_eq!(present.address(), Some(0x40_000A));

        let unresolved: Vec<_> = report.unresolved().map(|e| e.name.as_str()).collect();
        assert_eq!(unresolved, vec!["missing"]);
        assert_eq!(report.resolved_count(), 1);
    }

    #[test]
    fn test_report_preserves_registration_order() {
        let registry = SignatureRegistry::new();
        for (name, pattern) in [("c", "C3"), ("a", "AA"), ("b", "BB")] {
            registry
                .register(name, slot(name), pattern.parse().unwrap(), 0)
                .unwrap();
        }

        let report = registry.search_in(&region()).unwrap();
        let names: Vec<_> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_negative_offset() {
        let registry = SignatureRegistry::new();
        let target = slot("before_sub");
        registry
            .register("before_sub", Arc::clone(&target), "83 EC 10".parse().unwrap(), -3)
            .unwrap();

        registry.search_in(&region()).unwrap();
        assert_eq!(target.address(), Some(0x40_0002));
    }

    #[test]
    fn test_second_search_is_rejected() {
        let registry = SignatureRegistry::new();
        registry
            .register("prologue", slot("prologue"), "55 8B EC".parse().unwrap(), 0)
            .unwrap();

        registry.search_in(&region()).unwrap();
        assert!(registry.is_searched());
        assert!(registry.report().is_some());
        assert!(matches!(
            registry.search_in(&region()),
            Err(Error::SearchAlreadyPerformed)
        ));
        assert!(matches!(
            registry.register("late", slot("late"), "55".parse().unwrap(), 0),
            Err(Error::SearchAlreadyPerformed)
        ));
    }

    #[test]
    fn test_requests_are_consumed_by_search() {
        let registry = SignatureRegistry::new();
        registry
            .register("prologue", slot("prologue"), "55 8B EC".parse().unwrap(), 0)
            .unwrap();
        registry.search_in(&region()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.report().unwrap().entries.len(), 1);
    }

    #[test]
    fn test_mask_mismatch_is_rejected_at_registration() {
        let registry = SignatureRegistry::new();
        let err = registry
            .register_masked("bad", slot("bad"), &[0xAA, 0xBB], &[true], 0)
            .unwrap_err();
        assert!(err.is_signature_error());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_typed_static_slot() {
        static PROLOGUE: FunctionSlot<unsafe extern "C" fn(i32) -> i32> =
            FunctionSlot::new("prologue_typed");

        let registry = SignatureRegistry::new();
        registry
            .register("prologue_typed", &PROLOGUE, "55 8B EC".parse().unwrap(), 0)
            .unwrap();
        registry.search_in(&region()).unwrap();

        assert_eq!(PROLOGUE.address(), Some(0x40_0002));
    }

    #[test]
    fn test_same_slot_registered_twice_keeps_first() {
        let registry = SignatureRegistry::new();
        let target = slot("dup");
        registry
            .register("first", Arc::clone(&target), "55 8B EC".parse().unwrap(), 0)
            .unwrap();
        registry
            .register("second", Arc::clone(&target), "E8".parse().unwrap(), 0)
            .unwrap();

        let report = registry.search_in(&region()).unwrap();
        assert_eq!(target.address(), Some(0x40_0002));
        assert_eq!(report.get("second").unwrap().address, None);
    }

    #[test]
    fn test_host_search_without_module_leaves_registry_usable() {
        // Off Windows there is no host module; the failed lookup must not
        // consume the single search.
        let registry = SignatureRegistry::new();
        if registry.search().is_err() {
            assert!(!registry.is_searched());
            assert!(registry.search_in(&region()).is_ok());
        }
    }
}
