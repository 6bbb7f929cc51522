//! Trigger expressions: `once@YYYY-MM-DDTHH:MM`, `daily@HH:MM`,
//! `weekly@<DAY>@HH:MM` and `hourly`.

use crate::utils::errors::{EngineError, Result};
use chrono::{NaiveDateTime, NaiveTime, Weekday};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Once(NaiveDateTime),
    Daily(NaiveTime),
    Weekly(Weekday, NaiveTime),
    Hourly,
}

impl Trigger {
    /// `/SC` and timing arguments for `schtasks /Create`
    pub fn schtasks_arguments(&self) -> Vec<String> {
        let mut args = vec!["/SC".to_string()];
        match self {
            Trigger::Once(at) => {
                args.push("ONCE".into());
                args.push("/SD".into());
                args.push(at.format("%m/%d/%Y").to_string());
                args.push("/ST".into());
                args.push(at.format("%H:%M").to_string());
            }
            Trigger::Daily(time) => {
                args.push("DAILY".into());
                args.push("/ST".into());
                args.push(time.format("%H:%M").to_string());
            }
            Trigger::Weekly(day, time) => {
                args.push("WEEKLY".into());
                args.push("/D".into());
                args.push(day_code(*day).into());
                args.push("/ST".into());
                args.push(time.format("%H:%M").to_string());
            }
            Trigger::Hourly => args.push("HOURLY".into()),
        }
        args
    }
}

fn day_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

fn parse_time(s: &str, text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| invalid(text))
}

fn invalid(text: &str) -> EngineError {
    EngineError::Validation(format!(
        "invalid trigger '{}': expected once@YYYY-MM-DDTHH:MM, daily@HH:MM, weekly@DAY@HH:MM or hourly",
        text
    ))
}

impl FromStr for Trigger {
    type Err = EngineError;

    fn from_str(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('@').collect();
        match parts.as_slice() {
            [kind] if kind.eq_ignore_ascii_case("hourly") => Ok(Trigger::Hourly),
            [kind, at] if kind.eq_ignore_ascii_case("once") => NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M")
                .map(Trigger::Once)
                .map_err(|_| invalid(text)),
            [kind, time] if kind.eq_ignore_ascii_case("daily") => Ok(Trigger::Daily(parse_time(time, text)?)),
            [kind, day, time] if kind.eq_ignore_ascii_case("weekly") => {
                let day = day
                    .parse::<Weekday>()
                    .map_err(|_| invalid(text))?;
                Ok(Trigger::Weekly(day, parse_time(time, text)?))
            }
            _ => Err(invalid(text)),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Once(at) => write!(f, "once@{}", at.format("%Y-%m-%dT%H:%M")),
            Trigger::Daily(time) => write!(f, "daily@{}", time.format("%H:%M")),
            Trigger::Weekly(day, time) => write!(f, "weekly@{}@{}", day_code(*day), time.format("%H:%M")),
            Trigger::Hourly => write!(f, "hourly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triggers() -> Result<()> {
        assert_eq!("hourly".parse::<Trigger>()?, Trigger::Hourly);
        assert_eq!(
            "daily@02:30".parse::<Trigger>()?,
            Trigger::Daily(NaiveTime::from_hms_opt(2, 30, 0).unwrap())
        );
        assert_eq!(
            "weekly@fri@23:00".parse::<Trigger>()?.to_string(),
            "weekly@FRI@23:00"
        );
        assert_eq!(
            "once@2026-12-24T18:00".parse::<Trigger>()?.to_string(),
            "once@2026-12-24T18:00"
        );
        Ok(())
    }

    #[test]
    fn test_malformed_triggers() {
        for text in ["", "daily", "daily@25:00", "weekly@XYZ@10:00", "once@2026-13-01T00:00", "monthly@1"] {
            assert!(
                matches!(text.parse::<Trigger>(), Err(EngineError::Validation(_))),
                "{} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_once_schtasks_arguments() {
        let trigger: Trigger = "once@2026-12-24T18:05".parse().unwrap();
        assert_eq!(
            trigger.schtasks_arguments(),
            vec!["/SC", "ONCE", "/SD", "12/24/2026", "/ST", "18:05"]
        );
    }
}
