//! Bar interval labels.
//!
//! The engine never resamples; a timeframe only names which series to fetch
//! and gives a rough bars-per-month figure for up-front data sufficiency
//! checks.

use crate::error::{Result, WfoError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading sessions in an average month.
const SESSIONS_PER_MONTH: f64 = 21.0;

/// Supported bar intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    Minute(u32),
    Hour(u32),
    Day,
    Week,
}

impl Timeframe {
    /// Approximate number of bars in one month of data.
    ///
    /// Intraday figures assume a 24-hour market, daily figures a
    /// 21-session month.
    pub fn bars_per_month(&self) -> f64 {
        match self {
            Timeframe::Minute(n) => SESSIONS_PER_MONTH * 24.0 * 60.0 / (*n).max(1) as f64,
            Timeframe::Hour(n) => SESSIONS_PER_MONTH * 24.0 / (*n).max(1) as f64,
            Timeframe::Day => SESSIONS_PER_MONTH,
            Timeframe::Week => 52.0 / 12.0,
        }
    }

    /// Label used in file names and reports (e.g. `1d`, `4h`).
    pub fn label(&self) -> String {
        match self {
            Timeframe::Minute(n) => format!("{}m", n),
            Timeframe::Hour(n) => format!("{}h", n),
            Timeframe::Day => "1d".to_string(),
            Timeframe::Week => "1w".to_string(),
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Day
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Timeframe {
    type Err = WfoError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "1d" | "d" | "day" | "daily" => return Ok(Timeframe::Day),
            "1w" | "w" | "week" | "weekly" => return Ok(Timeframe::Week),
            _ => {}
        }

        let invalid = || WfoError::InvalidInput(format!("Unknown timeframe: '{}'", s));
        let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?);
        let n: u32 = digits.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }
        match unit {
            "m" | "min" => Ok(Timeframe::Minute(n)),
            "h" | "hour" => Ok(Timeframe::Hour(n)),
            "d" if n == 1 => Ok(Timeframe::Day),
            "w" if n == 1 => Ok(Timeframe::Week),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = WfoError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.label()
    }
}
