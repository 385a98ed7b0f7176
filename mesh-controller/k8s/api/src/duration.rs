use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A duration written in Go's `time.ParseDuration` syntax, e.g. `1h30m` or
/// `250ms`, as used by mesh resources.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit {0:?}: expected one of 'ns', 'us', 'ms', 's', 'm', or 'h'")]
    InvalidUnit(String),

    #[error("missing a unit after {0:?}")]
    NoUnit(String),

    #[error("negative durations are not supported")]
    Negative,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("empty duration")]
    Empty,
}

impl GoDuration {
    pub const ZERO: Self = Self(Duration::ZERO);

    #[inline]
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for GoDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<GoDuration> for Duration {
    fn from(GoDuration(d): GoDuration) -> Self {
        d
    }
}

fn unit(unit: &str) -> Result<Duration, ParseError> {
    Ok(match unit {
        "ns" => Duration::from_nanos(1),
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        other => return Err(ParseError::InvalidUnit(other.to_string())),
    })
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.starts_with('-') {
            // `-0` is still zero.
            return match s.trim_start_matches('-') {
                "0" => Ok(Self::ZERO),
                _ => Err(ParseError::Negative),
            };
        }
        let mut rest = s.trim_start_matches('+');
        if rest == "0" {
            return Ok(Self::ZERO);
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let num_end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(|| ParseError::NoUnit(rest.to_string()))?;
            let (num, tail) = rest.split_at(num_end);
            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (u, tail) = tail.split_at(unit_end);
            total += unit(u)?.mul_f64(num.parse::<f64>()?);
            rest = tail;
        }

        Ok(Self(total))
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;
        if d.is_zero() {
            return f.write_str("0s");
        }
        if d.subsec_nanos() == 0 {
            let secs = d.as_secs();
            let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
            if h > 0 {
                write!(f, "{h}h")?;
            }
            if h > 0 || m > 0 {
                write!(f, "{m}m")?;
            }
            return write!(f, "{s}s");
        }
        if d < Duration::from_millis(1) {
            return write!(f, "{}ns", d.as_nanos());
        }
        if d < Duration::from_secs(1) && d.as_nanos() % 1_000_000 == 0 {
            return write!(f, "{}ms", d.as_millis());
        }
        write!(f, "{}s", d.as_secs_f64())
    }
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl schemars::JsonSchema for GoDuration {
    fn schema_name() -> String {
        "GoDuration".to_owned()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        // Not "duration": that format means ISO 8601.
        schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            format: None,
            ..Default::default()
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_durations() {
        let cases: &[(&str, Duration)] = &[
            ("0", Duration::ZERO),
            ("-0", Duration::ZERO),
            ("5s", Duration::from_secs(5)),
            ("+5s", Duration::from_secs(5)),
            ("1.5s", Duration::from_millis(1500)),
            (".5s", Duration::from_millis(500)),
            ("250ms", Duration::from_millis(250)),
            ("10us", Duration::from_micros(10)),
            ("1h30m", Duration::from_secs(90 * 60)),
            ("2m3s", Duration::from_secs(123)),
        ];
        for (input, expected) in cases {
            assert_eq!(
                input.parse::<GoDuration>(),
                Ok(GoDuration(*expected)),
                "{input}"
            );
        }
    }

    #[test]
    fn rejects_invalid() {
        assert_eq!("".parse::<GoDuration>(), Err(ParseError::Empty));
        assert_eq!("-5s".parse::<GoDuration>(), Err(ParseError::Negative));
        assert_eq!(
            "5".parse::<GoDuration>(),
            Err(ParseError::NoUnit("5".to_string()))
        );
        assert_eq!(
            "5d".parse::<GoDuration>(),
            Err(ParseError::InvalidUnit("d".to_string()))
        );
    }

    #[test]
    fn displays() {
        for (d, s) in [
            (Duration::ZERO, "0s"),
            (Duration::from_secs(5), "5s"),
            (Duration::from_secs(90 * 60), "1h30m0s"),
            (Duration::from_millis(250), "250ms"),
        ] {
            assert_eq!(GoDuration(d).to_string(), s);
        }
    }

    #[test]
    fn deserializes_from_json() {
        let d: GoDuration = serde_json::from_str("\"30s\"").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(30));
        assert!(serde_json::from_str::<GoDuration>("\"30\"").is_err());
    }
}
