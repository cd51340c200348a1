//! Contention backoff for the lease protocol.

/// Delay before retrying a lease held by another device.
///
/// The retry must not land before the other device's claim lapses, and
/// contenders must not all land at the same instant afterwards, so the
/// delay is the remaining claim time plus a random slice of
/// `[min_ms, max_ms]`.
pub fn contention_delay(remaining_ms: u64, min_ms: u64, max_ms: u64) -> u64 {
    let span = max_ms.saturating_sub(min_ms);
    remaining_ms
        .saturating_add(min_ms)
        .saturating_add(random_below(span.saturating_add(1)))
}

/// Uniform random value in `0..bound` (zero when `bound` is zero or one).
fn random_below(bound: u64) -> u64 {
    if bound <= 1 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    u64::from_le_bytes(bytes) % bound
}
