use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Suffix length keeps the full reference comfortably past the 10-char
/// minimum: "BK" + 6 date digits + 4 random characters.
const SUFFIX_LEN: usize = 4;

/// Human-readable booking code, distinct from the booking UUID. Format:
/// `BK` + compact date + random alphanumeric suffix. Uniqueness is
/// enforced by the caller against the repository.
pub fn generate(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("BK{}{}", now.format("%y%m%d"), suffix)
}

/// Provider-facing numeric order code. Time-prefixed so codes sort
/// roughly by creation; the random tail avoids same-second collisions.
pub fn order_code(now: DateTime<Utc>) -> i64 {
    let tail: i64 = rand::thread_rng().gen_range(0..100_000);
    now.timestamp() * 100_000 + tail
}
