use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregated OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Bar open time, milliseconds since epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Kline interval enumeration
///
/// Time bucket for aggregating ticks into OHLC bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,

    #[serde(rename = "5m")]
    FiveMinutes,

    #[serde(rename = "15m")]
    FifteenMinutes,

    #[serde(rename = "30m")]
    ThirtyMinutes,

    #[serde(rename = "1h")]
    OneHour,

    #[serde(rename = "4h")]
    FourHours,

    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "30m" => Some(Interval::ThirtyMinutes),
            "1h" => Some(Interval::OneHour),
            "4h" => Some(Interval::FourHours),
            "1d" => Some(Interval::OneDay),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Interval::OneMinute,
            Interval::FiveMinutes,
            Interval::FifteenMinutes,
            Interval::ThirtyMinutes,
            Interval::OneHour,
            Interval::FourHours,
            Interval::OneDay,
        ]
    }

    pub fn duration_seconds(&self) -> i64 {
        match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::ThirtyMinutes => 1800,
            Interval::OneHour => 3600,
            Interval::FourHours => 14400,
            Interval::OneDay => 86400,
        }
    }

    pub fn duration_millis(&self) -> i64 {
        self.duration_seconds() * 1000
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_as_str() {
        assert_eq!(Interval::OneMinute.as_str(), "1m");
        assert_eq!(Interval::FourHours.as_str(), "4h");
        assert_eq!(Interval::OneDay.as_str(), "1d");
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(Interval::parse("1m"), Some(Interval::OneMinute));
        assert_eq!(Interval::parse("30m"), Some(Interval::ThirtyMinutes));
        assert_eq!(Interval::parse("2h"), None);
        assert_eq!(Interval::parse(""), None);
    }

    #[test]
    fn test_interval_duration() {
        assert_eq!(Interval::OneMinute.duration_seconds(), 60);
        assert_eq!(Interval::OneHour.duration_seconds(), 3600);
        assert_eq!(Interval::OneDay.duration_millis(), 86_400_000);
    }

    #[test]
    fn test_interval_all() {
        let all = Interval::all();
        assert_eq!(all.len(), 7);
        assert!(all.contains(&Interval::OneMinute));
        assert!(all.contains(&Interval::OneDay));
    }
}
