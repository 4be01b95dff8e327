/// Identity generation for optimistic and confirmed messages
use chrono::{DateTime, Utc};
use rand::Rng;

/// Prefix of every locally assigned, not yet confirmed message id
pub const TEMP_PREFIX: &str = "temp-";

const SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `temp-{unix_ms}-{7 base36 chars}`; unique for the session in practice,
/// callers still check against ids they already hold.
pub fn temporary_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}-{}", TEMP_PREFIX, now.timestamp_millis(), suffix)
}

pub fn is_temporary(id: &str) -> bool {
    id.starts_with(TEMP_PREFIX)
}

/// Client-side identity for a server-acknowledged message.
///
/// The server may hand out the same id twice, so the raw id is never used
/// as-is.
pub fn confirmed_id(server_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", server_id, at.timestamp_millis())
}

/// `confirmed_id`, suffixed with `-{n}` until `taken` rejects it no more
pub fn unique_confirmed_id(
    server_id: &str,
    at: DateTime<Utc>,
    taken: impl Fn(&str) -> bool,
) -> String {
    let base = confirmed_id(server_id, at);
    if !taken(&base) {
        return base;
    }
    let mut n: u64 = 1;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
