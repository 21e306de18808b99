//! Process-wide SDK initialisation.
//!
//! The vendor library must be initialised once before any session and terminated
//! once after the last one closes. [`SdkLifetime`] counts outstanding leases: the
//! first lease initialises, dropping the last lease terminates.

use super::CameraSdk;
use crate::error::SdkResult;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Lease counter for one SDK instance.
#[derive(Default)]
pub struct SdkLifetime {
    leases: Mutex<usize>,
}

impl SdkLifetime {
    /// Counter with no leases.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Global instance guarding the real EDSDK, which has process-wide state.
    #[cfg(feature = "edsdk_hardware")]
    pub fn shared_edsdk() -> Arc<Self> {
        use std::sync::OnceLock;
        static LIFETIME: OnceLock<Arc<SdkLifetime>> = OnceLock::new();
        LIFETIME.get_or_init(SdkLifetime::new).clone()
    }

    /// Take a lease, initialising the SDK if this is the first one.
    pub fn acquire(self: &Arc<Self>, sdk: Arc<dyn CameraSdk>) -> SdkResult<SdkLease> {
        let mut leases = self.leases.lock();
        if *leases == 0 {
            sdk.initialize()?;
            info!("Camera SDK initialized");
        }
        *leases += 1;
        Ok(SdkLease {
            lifetime: Arc::clone(self),
            sdk,
        })
    }

    /// Leases currently held.
    pub fn active_leases(&self) -> usize {
        *self.leases.lock()
    }

    fn release(&self, sdk: &dyn CameraSdk) {
        let mut leases = self.leases.lock();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            match sdk.terminate() {
                Ok(()) => info!("Camera SDK terminated"),
                Err(e) => warn!("Failed to terminate camera SDK: {}", e),
            }
        }
    }
}

/// RAII guard that keeps the SDK initialised while held
pub struct SdkLease {
    lifetime: Arc<SdkLifetime>,
    sdk: Arc<dyn CameraSdk>,
}

impl Drop for SdkLease {
    fn drop(&mut self) {
        self.lifetime.release(self.sdk.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockSdk, SdkOp};

    #[test]
    fn test_first_lease_initializes_last_terminates() {
        let sdk = Arc::new(MockSdk::new());
        let lifetime = SdkLifetime::new();

        let a = lifetime.acquire(sdk.clone()).unwrap();
        let b = lifetime.acquire(sdk.clone()).unwrap();
        assert_eq!(sdk.call_count(SdkOp::Initialize), 1);
        assert_eq!(lifetime.active_leases(), 2);

        drop(a);
        assert_eq!(sdk.call_count(SdkOp::Terminate), 0);
        drop(b);
        assert_eq!(sdk.call_count(SdkOp::Terminate), 1);
        assert_eq!(lifetime.active_leases(), 0);
    }

    #[test]
    fn test_failed_initialize_takes_no_lease() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_next(SdkOp::Initialize, edsdk_sys::EDS_ERR_INTERNAL_ERROR, 1);
        let lifetime = SdkLifetime::new();

        assert!(lifetime.acquire(sdk.clone()).is_err());
        assert_eq!(lifetime.active_leases(), 0);
        assert_eq!(sdk.call_count(SdkOp::Terminate), 0);
    }
}
