//! Duration Resolver (§4.7) — applies the four resolution rules in order
//! and enforces the hard `[MIN, MAX]` bounds.

use crate::error::SentinelError;

pub const MIN_DURATION_SECS: u64 = 15 * 60;
pub const MAX_DURATION_SECS: u64 = 12 * 60 * 60;

pub struct DurationResolver {
    pub service_default_secs: u64,
}

impl DurationResolver {
    pub fn new(service_default_secs: u64) -> Self {
        Self { service_default_secs }
    }

    /// `requested_secs` is `0` if the caller did not supply a duration.
    /// `max_server_duration` is `0` if the matched policy rule did not set
    /// one. `break_glass_remaining_secs` is `0` if no break-glass override
    /// is active.
    pub fn resolve(
        &self,
        requested_secs: u64,
        max_server_duration: u64,
        break_glass_remaining_secs: u64,
    ) -> Result<u64, SentinelError> {
        let mut duration = requested_secs;

        if duration != 0 && !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
            return Err(SentinelError::InvalidDuration(format!(
                "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds, got {duration}"
            )));
        }

        if max_server_duration > 0 && (duration == 0 || duration > max_server_duration) {
            duration = max_server_duration;
        }

        if break_glass_remaining_secs > 0 && break_glass_remaining_secs < duration {
            duration = break_glass_remaining_secs;
        }

        if duration == 0 {
            duration = self.service_default_secs;
        }

        Ok(duration)
    }

    /// Parses and validates the caller-supplied `duration` query parameter.
    /// Returns `0` (treated as "absent") when `raw` is `None`.
    pub fn parse_requested(raw: Option<&str>) -> Result<u64, SentinelError> {
        let Some(raw) = raw else { return Ok(0) };
        let value: u64 = raw
            .parse()
            .map_err(|_| SentinelError::InvalidDuration(format!("not a positive integer: {raw}")))?;
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&value) {
            return Err(SentinelError::InvalidDuration(format!(
                "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds, got {value}"
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> DurationResolver {
        DurationResolver::new(900)
    }

    #[test]
    fn boundary_900_and_43200_succeed() {
        assert_eq!(DurationResolver::parse_requested(Some("900")).unwrap(), 900);
        assert_eq!(DurationResolver::parse_requested(Some("43200")).unwrap(), 43200);
    }

    #[test]
    fn boundary_899_and_43201_fail() {
        assert!(DurationResolver::parse_requested(Some("899")).is_err());
        assert!(DurationResolver::parse_requested(Some("43201")).is_err());
    }

    #[test]
    fn absent_duration_defaults_to_service_default() {
        let r = resolver();
        assert_eq!(r.resolve(0, 0, 0).unwrap(), 900);
    }

    #[test]
    fn policy_cap_overrides_oversized_request() {
        let r = resolver();
        assert_eq!(r.resolve(3600, 600, 0).unwrap(), 600);
    }

    #[test]
    fn policy_cap_fills_in_for_absent_request() {
        let r = resolver();
        assert_eq!(r.resolve(0, 600, 0).unwrap(), 600);
    }

    #[test]
    fn request_under_cap_is_unaffected() {
        let r = resolver();
        assert_eq!(r.resolve(300 + 900, 3600, 0).unwrap(), 1200);
    }

    #[test]
    fn break_glass_clamps_below_requested() {
        let r = resolver();
        assert_eq!(r.resolve(3600, 0, 900).unwrap(), 900);
    }

    #[test]
    fn break_glass_does_not_extend_above_requested() {
        let r = resolver();
        assert_eq!(r.resolve(900, 0, 3600).unwrap(), 900);
    }

    #[test]
    fn invalid_non_numeric_duration_fails() {
        assert!(DurationResolver::parse_requested(Some("soon")).is_err());
    }
}
