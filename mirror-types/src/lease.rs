//! The lease: a time-bounded exclusive claim on a provider's shared
//! manifest.
//!
//! One lock object per provider holds the current lease. Only the device
//! named in a non-expired lease may read or write that provider's
//! manifest; everyone else backs off until the expiry passes.

use crate::{DeviceId, TypesError};
use serde::{Deserialize, Serialize};

/// Ownership claim on a provider's shared manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The device holding the claim.
    pub owner: DeviceId,
    /// Claim expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
}

impl Lease {
    /// Create a lease for `owner` lasting `duration_ms` from `now_ms`.
    pub fn claim(owner: DeviceId, now_ms: u64, duration_ms: u64) -> Self {
        Self {
            owner,
            expires_at_ms: now_ms.saturating_add(duration_ms),
        }
    }

    /// Whether the claim has lapsed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Milliseconds left on the claim at `now_ms`, zero if lapsed.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }

    /// Whether `device` holds this claim and it has not lapsed.
    pub fn held_by(&self, device: &DeviceId, now_ms: u64) -> bool {
        self.owner == *device && !self.is_expired(now_ms)
    }

    /// Encode to a MessagePack blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec(self).map_err(TypesError::Encode)
    }

    /// Decode from a MessagePack blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(tag: u8) -> DeviceId {
        DeviceId::from_bytes(&[tag; 32]).unwrap()
    }

    #[test]
    fn claim_sets_expiry_from_now() {
        let lease = Lease::claim(device(1), 1_000, 30_000);
        assert_eq!(lease.expires_at_ms, 31_000);
        assert!(!lease.is_expired(30_999));
        assert!(lease.is_expired(31_000));
    }

    #[test]
    fn remaining_is_zero_after_expiry() {
        let lease = Lease::claim(device(1), 1_000, 30_000);
        assert_eq!(lease.remaining_ms(21_000), 10_000);
        assert_eq!(lease.remaining_ms(31_000), 0);
        assert_eq!(lease.remaining_ms(99_000), 0);
    }

    #[test]
    fn held_by_checks_owner_and_expiry() {
        let lease = Lease::claim(device(1), 1_000, 30_000);
        assert!(lease.held_by(&device(1), 2_000));
        assert!(!lease.held_by(&device(2), 2_000));
        assert!(!lease.held_by(&device(1), 50_000));
    }

    #[test]
    fn lease_roundtrip() {
        let lease = Lease::claim(device(3), 5_000, 10_000);
        let bytes = lease.to_bytes().unwrap();
        let restored = Lease::from_bytes(&bytes).unwrap();
        assert_eq!(lease, restored);
    }
}
