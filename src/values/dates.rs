use crate::imports::*;
use chrono::{
    DateTime, Datelike, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, TimeDelta,
    TimeZone, Weekday,
};
use regex::Regex;

/*
    Date parsing for `date` parameters and the sqlDate helpers.
    * Absolute formats are tried first, in order.
    * Anything else goes through a small natural-language parser relative to a reference time.
    Parsed dates travel through the engine as RFC 3339 strings.
*/
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y",
    "%b %d %Y", "%d %B %Y", "%d %b %Y",
];

const NUMBER: &str = r"(\d+|a|an|one|two|three|four|five|six|seven|eight|nine|ten)";
const UNIT: &str = r"(second|minute|hour|day|week|month|year)s?";

static AGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{NUMBER}\s+{UNIT}\s+ago$")).expect("date parser: invalid 'ago' regex")
});
static IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^in\s+{NUMBER}\s+{UNIT}$")).expect("date parser: invalid 'in' regex")
});
static LAST_NEXT_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(last|next)\s+{UNIT}$")).expect("date parser: invalid unit regex")
});
static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(last|next|this)\s+)?(mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun|monday|tuesday|wednesday|thursday|friday|saturday|sunday)$")
        .expect("date parser: invalid weekday regex")
});

pub fn parse_date(input: &str, reference: DateTime<Local>) -> std::result::Result<DateTime<FixedOffset>, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty date".to_string());
    }
    if let Some(parsed) = parse_absolute(trimmed) {
        return Ok(parsed);
    }
    parse_natural(trimmed, reference)
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| format!("'{trimmed}' is not a recognised date"))
}

pub fn parse_absolute(input: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt);
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return local(naive);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return local(date.and_hms_opt(0, 0, 0)?);
        }
    }
    None
}

fn local(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

fn parse_natural(input: &str, reference: DateTime<Local>) -> Option<DateTime<Local>> {
    let input = input.to_lowercase();
    match input.as_str() {
        "now" => return Some(reference),
        "today" => return midnight(reference),
        "yesterday" => return midnight(reference - TimeDelta::try_days(1)?),
        "tomorrow" => return midnight(reference + TimeDelta::try_days(1)?),
        _ => {}
    }

    if let Some(caps) = AGO.captures(&input) {
        let amount = parse_amount(&caps[1])?;
        return shift(reference, &caps[2], amount.checked_neg()?);
    }
    if let Some(caps) = IN.captures(&input) {
        let amount = parse_amount(&caps[1])?;
        return shift(reference, &caps[2], amount);
    }
    if let Some(caps) = LAST_NEXT_UNIT.captures(&input) {
        let amount = if &caps[1] == "last" { -1 } else { 1 };
        return shift(reference, &caps[2], amount);
    }
    if let Some(caps) = WEEKDAY.captures(&input) {
        let target = parse_weekday(&caps[2])?;
        let current = reference.weekday().num_days_from_monday() as i64;
        let wanted = target.num_days_from_monday() as i64;
        let offset = match caps.get(1).map(|m| m.as_str()) {
            Some("next") => match (wanted - current).rem_euclid(7) {
                0 => 7,
                n => n,
            },
            Some("this") => wanted - current,
            Some("last") => match (current - wanted).rem_euclid(7) {
                0 => -7,
                n => -n,
            },
            // A bare weekday means the most recent one, today included.
            _ => -((current - wanted).rem_euclid(7)),
        };
        return midnight(reference + TimeDelta::try_days(offset)?);
    }
    None
}

fn parse_amount(raw: &str) -> Option<i64> {
    match raw {
        "a" | "an" | "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        digits => digits.parse().ok(),
    }
}

fn parse_weekday(raw: &str) -> Option<Weekday> {
    Some(match &raw[..3] {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    })
}

fn shift(reference: DateTime<Local>, unit: &str, amount: i64) -> Option<DateTime<Local>> {
    let seconds = match unit {
        "second" => Some(1),
        "minute" => Some(60),
        "hour" => Some(3_600),
        "day" => Some(86_400),
        "week" => Some(604_800),
        _ => None,
    };
    if let Some(multiplier) = seconds {
        let delta = TimeDelta::try_seconds(amount.checked_mul(multiplier)?)?;
        return reference.checked_add_signed(delta);
    }

    let months = match unit {
        "month" => amount,
        "year" => amount.checked_mul(12)?,
        _ => return None,
    };
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        reference.checked_add_months(magnitude)
    } else {
        reference.checked_sub_months(magnitude)
    }
}

fn midnight(at: DateTime<Local>) -> Option<DateTime<Local>> {
    Local
        .from_local_datetime(&at.date_naive().and_hms_opt(0, 0, 0)?)
        .earliest()
}
