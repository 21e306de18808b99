//! Ownership of reference-counted SDK objects.
//!
//! Every object an acquiring call hands back goes into a [`ScopedHandle`], which
//! releases it when dropped. The registry tracks which objects are live so a handle
//! can never be released twice, and so tests can assert nothing leaked.

use super::{CameraSdk, ObjectRef};
use crate::error::SdkResult;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tracks the SDK objects owned by live [`ScopedHandle`]s.
pub struct HandleRegistry {
    sdk: Arc<dyn CameraSdk>,
    live: Mutex<HashSet<ObjectRef>>,
}

impl HandleRegistry {
    /// Registry that releases through `sdk`.
    pub fn new(sdk: Arc<dyn CameraSdk>) -> Arc<Self> {
        Arc::new(Self {
            sdk,
            live: Mutex::new(HashSet::new()),
        })
    }

    /// Run an acquiring call and scope its result.
    pub fn acquire<F>(self: &Arc<Self>, label: &'static str, acquire: F) -> SdkResult<ScopedHandle>
    where
        F: FnOnce(&dyn CameraSdk) -> SdkResult<ObjectRef>,
    {
        let raw = acquire(self.sdk.as_ref())?;
        Ok(self.adopt(label, raw))
    }

    /// Take ownership of an object acquired elsewhere, e.g. one passed into a callback.
    pub fn adopt(self: &Arc<Self>, label: &'static str, raw: ObjectRef) -> ScopedHandle {
        if !self.live.lock().insert(raw) {
            warn!(object = %raw, label, "Adopting an object that is already owned");
        }
        ScopedHandle {
            raw: Some(raw),
            label,
            registry: Arc::clone(self),
        }
    }

    /// Number of objects currently owned through this registry.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    fn release(&self, raw: ObjectRef, label: &'static str) -> SdkResult<()> {
        if !self.live.lock().remove(&raw) {
            warn!(object = %raw, label, "Skipping release of an object that is not live");
            return Ok(());
        }
        debug!(object = %raw, label, "Releasing");
        self.sdk.release(raw)
    }
}

/// RAII owner of one SDK object reference.
pub struct ScopedHandle {
    raw: Option<ObjectRef>,
    label: &'static str,
    registry: Arc<HandleRegistry>,
}

impl ScopedHandle {
    /// The object, for passing to SDK calls. Do not release it directly.
    pub fn raw(&self) -> ObjectRef {
        // `raw` is only emptied by `release` and `drop`, both of which consume the handle.
        self.raw.unwrap_or(ObjectRef(0))
    }

    /// Release now and report the outcome instead of logging it.
    pub fn release(mut self) -> SdkResult<()> {
        match self.raw.take() {
            Some(raw) => self.registry.release(raw, self.label),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("raw", &self.raw)
            .field("label", &self.label)
            .finish()
    }
}

impl Drop for ScopedHandle {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            if let Err(e) = self.registry.release(raw, self.label) {
                warn!(object = %raw, label = self.label, "Failed to release: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockSdk, SdkOp};
    use tracing_test::traced_test;

    #[test]
    fn test_drop_releases_once() {
        let sdk = Arc::new(MockSdk::new());
        let registry = HandleRegistry::new(sdk.clone());

        {
            let stream = registry
                .acquire("stream", |sdk| sdk.create_memory_stream(0))
                .unwrap();
            assert_eq!(registry.live_count(), 1);
            assert_eq!(sdk.outstanding_objects().len(), 1);
            let _ = stream.raw();
        }

        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.call_count(SdkOp::Release), 1);
        assert!(sdk.outstanding_objects().is_empty());
    }

    #[test]
    fn test_explicit_release_reports_error() {
        let sdk = Arc::new(MockSdk::new());
        let registry = HandleRegistry::new(sdk.clone());
        let stream = registry
            .acquire("stream", |sdk| sdk.create_memory_stream(0))
            .unwrap();

        sdk.fail_next(SdkOp::Release, edsdk_sys::EDS_ERR_INVALID_HANDLE, 1);
        assert!(stream.release().is_err());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.call_count(SdkOp::Release), 1);
    }

    #[traced_test]
    #[test]
    fn test_release_failure_on_drop_is_logged() {
        let sdk = Arc::new(MockSdk::new());
        let registry = HandleRegistry::new(sdk.clone());
        let stream = registry
            .acquire("evf image", |sdk| sdk.create_memory_stream(0))
            .unwrap();

        sdk.fail_next(SdkOp::Release, edsdk_sys::EDS_ERR_INVALID_HANDLE, 1);
        drop(stream);

        assert!(logs_contain("Failed to release"));
    }

    #[test]
    fn test_failed_acquire_owns_nothing() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_next(SdkOp::CreateMemoryStream, edsdk_sys::EDS_ERR_MEM_ALLOC_FAILED, 1);
        let registry = HandleRegistry::new(sdk.clone());

        assert!(registry
            .acquire("stream", |sdk| sdk.create_memory_stream(0))
            .is_err());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.call_count(SdkOp::Release), 0);
    }
}
