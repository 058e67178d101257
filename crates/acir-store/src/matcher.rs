//! Raw timing-sequence comparison used for scene recall.
//!
//! Two captures of the same remote button rarely agree to the microsecond,
//! but the default policy deliberately stays strict: a cheap length
//! pre-filter followed by exact string equality.  The per-value tolerant
//! comparison is available as an opt-in [`MatchPolicy::Tolerant`].

/// How two raw timing sequences are compared once they pass the length
/// pre-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Byte-for-byte equality of the comma-separated strings.
    #[default]
    Exact,
    /// Same number of durations, each within `percent`% of the stored value.
    Tolerant { percent: u8 },
}

/// Decide whether `probe` (fresh capture) matches `stored` (learned scene).
///
/// The capture is rejected outright when the string lengths differ by more
/// than a tenth of the probe's length.
pub fn signals_match(probe: &str, stored: &str, policy: MatchPolicy) -> bool {
    if !within_length_window(probe, stored) {
        return false;
    }
    match policy {
        MatchPolicy::Exact => probe == stored,
        MatchPolicy::Tolerant { percent } => durations_within(probe, stored, percent),
    }
}

fn within_length_window(probe: &str, stored: &str) -> bool {
    probe.len().abs_diff(stored.len()) <= probe.len() / 10
}

/// Parse a comma-separated list of microsecond durations.
pub fn parse_durations(raw: &str) -> Option<Vec<u32>> {
    raw.split(',')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

fn durations_within(probe: &str, stored: &str, percent: u8) -> bool {
    let (Some(probe), Some(stored)) = (parse_durations(probe), parse_durations(stored)) else {
        return false;
    };
    if probe.is_empty() || probe.len() != stored.len() {
        return false;
    }
    probe.iter().zip(&stored).all(|(&p, &s)| {
        let diff = u64::from(p.abs_diff(s));
        diff * 100 <= u64::from(s) * u64::from(percent)
    })
}
