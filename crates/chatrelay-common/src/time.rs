use chrono::{DateTime, Utc};

/// Current wall-clock time. Centralized so tests can substitute a fixed
/// clock by constructing timestamps directly rather than calling this.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Returns `true` once `deadline` has passed relative to `now()`.
#[must_use]
pub fn is_past(deadline: DateTime<Utc>) -> bool {
    deadline <= now()
}
