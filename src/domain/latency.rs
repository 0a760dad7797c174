//! Latency between event generation, the session clock and local receipt.
//!
//! All gaps are `client_receive - reference` in milliseconds: positive means
//! the client observed the event after the reference point.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};

/// Label used in place of a gap that could not be computed.
pub const UNAVAILABLE: &str = "unavailable";

/// Latency facts about one event. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyReport {
    /// Local instant the notification was received.
    pub client_received: DateTime<Utc>,
    /// Instant the event was generated at the source.
    pub event_generated: DateTime<Utc>,
    /// Server clock reading, if it could be read.
    pub session_clock: Option<DateTime<Utc>>,
    /// `client_received - event_generated`.
    pub event_gap_ms: f64,
    /// `client_received - session_clock`; `None` when the clock was unavailable.
    pub clock_drift_ms: Option<f64>,
    /// `client_received - processing_end`, when the process end is known.
    pub turnaround_ms: Option<f64>,
}

impl LatencyReport {
    /// Computes the report. Never fails: a missing session clock only
    /// makes the drift unavailable.
    #[must_use]
    pub fn compute(
        event_generated: DateTime<Utc>,
        client_received: DateTime<Utc>,
        session_clock: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client_received,
            event_generated,
            session_clock,
            event_gap_ms: gap_ms(client_received, event_generated),
            clock_drift_ms: session_clock.map(|clock| gap_ms(client_received, clock)),
            turnaround_ms: None,
        }
    }

    /// Adds the turnaround from the end of the joining process.
    #[must_use]
    pub fn with_processing_end(mut self, processing_end: Option<DateTime<Utc>>) -> Self {
        self.turnaround_ms = processing_end.map(|end| gap_ms(self.client_received, end));
        self
    }

    /// Human rendering of the event gap, e.g. `250.000 ms (behind)`.
    #[must_use]
    pub fn event_gap_display(&self) -> String {
        describe_gap(Some(self.event_gap_ms))
    }

    /// Human rendering of the clock drift, or [`UNAVAILABLE`].
    #[must_use]
    pub fn clock_drift_display(&self) -> String {
        describe_gap(self.clock_drift_ms)
    }

    /// Human rendering of the turnaround, or [`UNAVAILABLE`].
    #[must_use]
    pub fn turnaround_display(&self) -> String {
        describe_gap(self.turnaround_ms)
    }
}

/// Milliseconds from `reference` to `observed`, with sub-millisecond precision.
#[must_use]
pub fn gap_ms(observed: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
    let delta = observed.signed_duration_since(reference);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

/// Direction of a gap: the client is `behind` the reference when it
/// observed the event later.
#[must_use]
pub fn direction_label(gap_ms: f64) -> &'static str {
    if gap_ms < 0.0 { "ahead" } else { "behind" }
}

fn describe_gap(gap_ms: Option<f64>) -> String {
    match gap_ms {
        Some(ms) => format!("{:.3} ms ({})", ms.abs(), direction_label(ms)),
        None => UNAVAILABLE.to_string(),
    }
}

/// Precision of human-readable timestamps.
///
/// Sub-second digits are truncated, never rounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampPrecision {
    /// Three fractional digits.
    #[default]
    Millis,
    /// Six fractional digits.
    Micros,
}

impl FromStr for TimestampPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            other => Err(format!("unknown timestamp precision: {other}")),
        }
    }
}

impl fmt::Display for TimestampPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis => f.write_str("ms"),
            Self::Micros => f.write_str("us"),
        }
    }
}

/// Formats `dt` in the given zone as `YYYY-MM-DD HH:MM:SS.fff[fff]`.
#[must_use]
pub fn format_timestamp_in<Tz>(dt: DateTime<Utc>, tz: &Tz, precision: TimestampPrecision) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let local = dt.with_timezone(tz);
    match precision {
        TimestampPrecision::Millis => local.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        TimestampPrecision::Micros => local.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    }
}

/// Formats `dt` in the local time zone.
#[must_use]
pub fn format_local(dt: DateTime<Utc>, precision: TimestampPrecision) -> String {
    format_timestamp_in(dt, &Local, precision)
}

/// Formats an optional timestamp, rendering `None` as `Unavailable`.
#[must_use]
pub fn format_optional(dt: Option<DateTime<Utc>>, precision: TimestampPrecision) -> String {
    dt.map_or_else(|| "Unavailable".to_string(), |dt| format_local(dt, precision))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn t0() -> DateTime<Utc> {
        let Some(naive) = NaiveDate::from_ymd_opt(2024, 3, 14)
            .and_then(|d| d.and_hms_micro_opt(9, 26, 53, 589_793))
        else {
            panic!("valid timestamp");
        };
        naive.and_utc()
    }

    #[test]
    fn event_gap_without_session_clock() {
        let generated = t0();
        let received = generated + Duration::milliseconds(250);
        let report = LatencyReport::compute(generated, received, None);
        assert!((report.event_gap_ms - 250.0).abs() < 1e-9);
        assert_eq!(report.clock_drift_ms, None);
        assert_eq!(report.clock_drift_display(), UNAVAILABLE);
        assert_eq!(report.event_gap_display(), "250.000 ms (behind)");
    }

    #[test]
    fn clock_drift_sign_yields_direction() {
        let received = t0();
        let clock = received + Duration::milliseconds(40);
        let report = LatencyReport::compute(received, received, Some(clock));
        assert_eq!(report.clock_drift_ms, Some(-40.0));
        assert_eq!(report.clock_drift_display(), "40.000 ms (ahead)");
    }

    #[test]
    fn turnaround_uses_processing_end() {
        let end = t0();
        let received = end + Duration::microseconds(1_500);
        let report = LatencyReport::compute(end, received, None).with_processing_end(Some(end));
        assert_eq!(report.turnaround_ms, Some(1.5));
        let without = LatencyReport::compute(end, received, None).with_processing_end(None);
        assert_eq!(without.turnaround_display(), UNAVAILABLE);
    }

    #[test]
    fn millis_precision_truncates() {
        let formatted = format_timestamp_in(t0(), &Utc, TimestampPrecision::Millis);
        assert_eq!(formatted, "2024-03-14 09:26:53.589");
    }

    #[test]
    fn micros_precision_keeps_six_digits() {
        let formatted = format_timestamp_in(t0(), &Utc, TimestampPrecision::Micros);
        assert_eq!(formatted, "2024-03-14 09:26:53.589793");
    }

    #[test]
    fn precision_parses_from_config_strings() {
        assert_eq!("ms".parse::<TimestampPrecision>(), Ok(TimestampPrecision::Millis));
        assert_eq!(" US ".parse::<TimestampPrecision>(), Ok(TimestampPrecision::Micros));
        assert!("ns".parse::<TimestampPrecision>().is_err());
    }

    #[test]
    fn missing_timestamp_renders_unavailable() {
        assert_eq!(format_optional(None, TimestampPrecision::Millis), "Unavailable");
    }
}
