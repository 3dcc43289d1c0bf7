use crate::time::error::Error;
use core::str::FromStr;
use lazy_static::*;
use regex::Regex;
use std::time::Duration;

lazy_static! {
    static ref DURATION_REGEX: Regex =
        Regex::new(r"^\s*(?P<value>\d+)\s*(?P<unit>[a-z]+)\s*$").expect("Regex compilation error");
}

/// A duration written as a number followed by a unit, e.g. `200ms` or `5 minutes`.
#[derive(Debug, PartialEq)]
pub struct DurationUnit {
    value: u64,
    unit: TimeUnit,
}

#[derive(Debug, PartialEq)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl FromStr for DurationUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DURATION_REGEX
            .captures(s)
            .ok_or_else(|| Error::Syntax(format!("'{}' is not a duration", s)))?;
        let value = caps["value"]
            .parse()
            .map_err(|_| Error::Syntax(format!("'{}' is out of range", &caps["value"])))?;
        let unit = caps["unit"].parse::<TimeUnit>()?;
        Ok(Self { value, unit })
    }
}

impl From<DurationUnit> for Duration {
    fn from(duration: DurationUnit) -> Duration {
        let value = duration.value;
        match duration.unit {
            TimeUnit::Nanosecond => Duration::from_nanos(value),
            TimeUnit::Microsecond => Duration::from_micros(value),
            TimeUnit::Millisecond => Duration::from_millis(value),
            TimeUnit::Second => Duration::from_secs(value),
            TimeUnit::Minute => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hour => Duration::from_secs(value.saturating_mul(60 * 60)),
            TimeUnit::Day => Duration::from_secs(value.saturating_mul(60 * 60 * 24)),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" | "nanosecond" | "nanos" | "nanoseconds" => Ok(TimeUnit::Nanosecond),
            "us" | "microsecond" | "micros" | "microseconds" => Ok(TimeUnit::Microsecond),
            "ms" | "millisecond" | "millis" | "milliseconds" => Ok(TimeUnit::Millisecond),
            "s" | "second" | "secs" | "seconds" => Ok(TimeUnit::Second),
            "m" | "minute" | "mins" | "minutes" => Ok(TimeUnit::Minute),
            "h" | "hour" | "hours" => Ok(TimeUnit::Hour),
            "d" | "day" | "days" => Ok(TimeUnit::Day),
            _ => Err(Error::UnitNotSupported(format!(
                "Unit '{}' not supported",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_time_unit_from_string() {
        let cases = [
            ("ns", TimeUnit::Nanosecond),
            ("us", TimeUnit::Microsecond),
            ("ms", TimeUnit::Millisecond),
            ("s", TimeUnit::Second),
            ("m", TimeUnit::Minute),
            ("h", TimeUnit::Hour),
            ("days", TimeUnit::Day),
        ];
        for (value, expected) in cases.iter() {
            assert_eq!(&value.parse::<TimeUnit>().unwrap(), expected);
        }
        assert!("weeks".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_conversion_duration_unit_to_duration() {
        let unit = "200ms".parse::<DurationUnit>().unwrap();
        let result: Duration = unit.into();
        assert_eq!(result, Duration::from_millis(200));

        let result: Duration = "2 minutes".parse::<DurationUnit>().unwrap().into();
        assert_eq!(result, Duration::from_secs(120));
    }

    #[test]
    fn test_malformed_duration() {
        assert!(matches!("ms".parse::<DurationUnit>(), Err(Error::Syntax(_))));
        assert!(matches!(
            "10 parsecs".parse::<DurationUnit>(),
            Err(Error::UnitNotSupported(_))
        ));
    }
}
