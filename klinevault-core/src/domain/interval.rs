//! Candle interval: the fixed duration each candle spans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTE_MS: i64 = 60_000;

/// Fixed-duration kline intervals supported by the upstream API.
///
/// The calendar-month interval is deliberately absent: its duration varies,
/// so the close-time span check cannot be applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Interval {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
}

#[derive(Debug, Error, PartialEq)]
#[error("unsupported interval '{0}'. Valid: 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d, 3d, 1w")]
pub struct InvalidInterval(pub String);

impl Interval {
    pub const ALL: [Interval; 14] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
    ];

    /// Wire notation used in the `interval` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
        }
    }

    /// Duration of one candle in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        let minutes = match self {
            Interval::OneMinute => 1,
            Interval::ThreeMinutes => 3,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
            Interval::ThirtyMinutes => 30,
            Interval::OneHour => 60,
            Interval::TwoHours => 2 * 60,
            Interval::FourHours => 4 * 60,
            Interval::SixHours => 6 * 60,
            Interval::EightHours => 8 * 60,
            Interval::TwelveHours => 12 * 60,
            Interval::OneDay => 24 * 60,
            Interval::ThreeDays => 3 * 24 * 60,
            Interval::OneWeek => 7 * 24 * 60,
        };
        minutes * MINUTE_MS
    }

    /// The `close_time - open_time` span of a well-formed candle.
    pub fn expected_span_ms(&self) -> i64 {
        self.duration_ms() - 1
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| InvalidInterval(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_minute_span_is_59999() {
        assert_eq!(Interval::OneMinute.expected_span_ms(), 59_999);
        assert_eq!(Interval::default(), Interval::OneMinute);
    }

    #[test]
    fn parse_matches_wire_notation() {
        for interval in Interval::ALL {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
    }

    #[test]
    fn monthly_is_rejected() {
        assert_eq!(
            "1M".parse::<Interval>(),
            Err(InvalidInterval("1M".to_string()))
        );
    }

    #[test]
    fn serde_uses_wire_notation() {
        let json = serde_json::to_string(&Interval::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Interval = serde_json::from_str("\"1w\"").unwrap();
        assert_eq!(back, Interval::OneWeek);
        assert_eq!(back.duration_ms(), 604_800_000);
    }
}
