//! Busy-retry policies for device commands.
//!
//! Each command kind carries its own [`RetryPolicy`]. Only busy failures are ever
//! retried; every other error kind is terminal on the first attempt.

use crate::command::OperationKind;
use crate::error::{BusyDisposition, SdkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every attempt
    Fixed {
        /// Delay between attempts
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    /// Doubling delay
    Exponential {
        /// Delay after the first attempt
        #[serde(rename = "initial_ms", with = "millis")]
        initial: Duration,
        /// Cap
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },
}

impl Backoff {
    /// Shorthand for [`Backoff::Fixed`].
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// Which failures a policy retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Fail on the first error
    Never,
    /// Any `DeviceBusy` failure.
    Busy,
    /// `DeviceBusy` only when the device never accepted the command.
    BusyNotAccepted,
}

/// Defines a policy for retrying a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: Backoff,
    /// Which failures are retried
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::fixed(Duration::from_secs(1)),
            retry_on: RetryOn::Busy,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::fixed(Duration::ZERO),
            retry_on: RetryOn::Never,
        }
    }

    /// Set the attempt bound; 0 is treated as 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry predicate.
    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Whether `error`, seen on attempt number `attempts`, earns another attempt.
    pub fn should_retry(&self, error: &SdkError, attempts: u32) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        match (self.retry_on, error.busy_disposition()) {
            (RetryOn::Never, _) | (_, None) => false,
            (RetryOn::Busy, Some(_)) => true,
            (RetryOn::BusyNotAccepted, Some(disposition)) => {
                disposition == BusyDisposition::NotAccepted
            }
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_after(attempt)
    }
}

/// Retry policy per operation kind.
///
/// A configured base replaces the attempt bound and backoff of every kind except
/// live-view frame downloads; each kind keeps its own retry predicate unless an
/// explicit override says otherwise.
#[derive(Clone, Debug, Default)]
pub struct RetryPolicies {
    base: Option<RetryPolicy>,
    overrides: HashMap<OperationKind, RetryPolicy>,
}

impl RetryPolicies {
    /// Built-in policies only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured attempt bound and backoff for every kind.
    pub fn with_base(mut self, base: RetryPolicy) -> Self {
        self.base = Some(base);
        self
    }

    /// Full policy for one kind, taking precedence over the base.
    pub fn with_override(mut self, kind: OperationKind, policy: RetryPolicy) -> Self {
        self.overrides.insert(kind, policy);
        self
    }

    /// Effective policy for `kind`.
    pub fn for_kind(&self, kind: OperationKind) -> RetryPolicy {
        if let Some(policy) = self.overrides.get(&kind) {
            return *policy;
        }
        let policy = kind.default_policy();
        match self.base {
            Some(base) if kind != OperationKind::DownloadEvf => RetryPolicy {
                max_attempts: base.max_attempts,
                backoff: base.backoff,
                retry_on: policy.retry_on,
            },
            _ => policy,
        }
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edsdk_sys as sys;

    fn busy() -> SdkError {
        SdkError::from_status(sys::EDS_ERR_DEVICE_BUSY, "test")
    }

    fn ptp_busy() -> SdkError {
        SdkError::from_status(sys::EDS_ERR_PTP_DEVICE_BUSY, "test")
    }

    #[test]
    fn test_busy_is_retried_until_bound() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.should_retry(&busy(), 1));
        assert!(policy.should_retry(&busy(), 2));
        assert!(!policy.should_retry(&busy(), 3));
    }

    #[test]
    fn test_non_busy_is_terminal() {
        let policy = RetryPolicy::default();
        let err = SdkError::from_status(sys::EDS_ERR_COMM_DISCONNECTED, "test");
        assert!(!policy.should_retry(&err, 1));
    }

    #[test]
    fn test_not_accepted_predicate() {
        let policy = RetryPolicy::default().with_retry_on(RetryOn::BusyNotAccepted);
        assert!(policy.should_retry(&busy(), 1));
        assert!(!policy.should_retry(&ptp_busy(), 1));
    }

    #[test]
    fn test_policy_table_keeps_per_kind_predicate() {
        let policies = RetryPolicies::new().with_base(
            RetryPolicy::default()
                .with_max_attempts(7)
                .with_backoff(Backoff::fixed(Duration::from_millis(5))),
        );
        let lens = policies.for_kind(OperationKind::DriveLens);
        assert_eq!(lens.max_attempts, 7);
        assert_eq!(lens.retry_on, RetryOn::BusyNotAccepted);

        let open = policies.for_kind(OperationKind::OpenSession);
        assert_eq!(open.retry_on, RetryOn::Busy);
        assert_eq!(open.delay_after(1), Duration::from_millis(5));

        assert_eq!(
            policies.for_kind(OperationKind::DownloadEvf),
            OperationKind::DownloadEvf.default_policy()
        );

        let policies = policies.with_override(OperationKind::TakePicture, RetryPolicy::once());
        assert_eq!(
            policies.for_kind(OperationKind::TakePicture),
            RetryPolicy::once()
        );
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_after(40), Duration::from_millis(350));
    }
}
