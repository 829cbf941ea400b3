// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery schedule expressions.
//!
//! Three kinds:
//! - relative: `30s`, `10m`, `1h`, `2d` (and bare `0` for "now")
//! - next-day-at: `14:00` -> today at 14:00 if still ahead, else tomorrow
//! - offset-days-at: `+2d 18:00` -> today + 2 days at 18:00, shifted one
//!   more day when that instant is already past
//!
//! Resolution is timezone-aware end-to-end: the campaign timezone
//! drives the local wall-clock math and the result comes back in UTC.

use botfleet_core::FleetError;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A parsed schedule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleExpr {
    /// Fire after this many seconds.
    Relative(u64),
    /// Fire at this local time today, or tomorrow when already past.
    NextDayAt(NaiveTime),
    /// Fire at this local time `days` days ahead, +1 day when past.
    OffsetDaysAt(u32, NaiveTime),
}

impl ScheduleExpr {
    /// Persistence discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleExpr::Relative(_) => "relative",
            ScheduleExpr::NextDayAt(_) => "next_day_at",
            ScheduleExpr::OffsetDaysAt(..) => "plus_days_at",
        }
    }

    /// Persistence value paired with [`Self::kind`].
    pub fn value(&self) -> String {
        match self {
            ScheduleExpr::Relative(secs) => secs.to_string(),
            ScheduleExpr::NextDayAt(time) => time.format("%H:%M").to_string(),
            ScheduleExpr::OffsetDaysAt(days, time) => {
                format!("{days}|{}", time.format("%H:%M"))
            }
        }
    }

    /// Rebuilds an expression from its stored (kind, value) pair.
    pub fn decode(kind: &str, value: &str) -> Result<Self, FleetError> {
        match kind {
            "relative" => {
                let secs = value.parse::<u64>().map_err(|_| {
                    FleetError::Validation(format!("bad relative schedule value {value}"))
                })?;
                Ok(ScheduleExpr::Relative(secs))
            }
            "next_day_at" => Ok(ScheduleExpr::NextDayAt(parse_time(value)?)),
            "plus_days_at" => {
                let (days, time) = value.split_once('|').ok_or_else(|| {
                    FleetError::Validation(format!("bad plus-days schedule value {value}"))
                })?;
                let days = days.parse::<u32>().map_err(|_| {
                    FleetError::Validation(format!("bad plus-days count {days}"))
                })?;
                Ok(ScheduleExpr::OffsetDaysAt(days, parse_time(time)?))
            }
            other => Err(FleetError::Validation(format!("unknown schedule kind {other}"))),
        }
    }
}

fn parse_time(fragment: &str) -> Result<NaiveTime, FleetError> {
    NaiveTime::parse_from_str(fragment.trim(), "%H:%M")
        .map_err(|_| FleetError::Validation(format!("invalid time {fragment}, expected HH:MM")))
}

/// Parses an admin-supplied schedule expression.
pub fn parse_schedule(expression: &str) -> Result<ScheduleExpr, FleetError> {
    let normalized = expression.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(FleetError::Validation("empty schedule expression".into()));
    }
    if normalized == "0" {
        return Ok(ScheduleExpr::Relative(0));
    }

    let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();

    // +Nd HH:MM / +NdHH:MM
    if let Some(rest) = compact.strip_prefix('+') {
        if let Some(d_pos) = rest.find('d') {
            let (days, time) = rest.split_at(d_pos);
            let days = days.parse::<u32>().map_err(|_| {
                FleetError::Validation(format!("invalid day offset in {expression}"))
            })?;
            return Ok(ScheduleExpr::OffsetDaysAt(days, parse_time(&time[1..])?));
        }
        return Err(FleetError::Validation(format!(
            "invalid schedule {expression}, expected +Nd HH:MM"
        )));
    }

    // Bare HH:MM
    if compact.contains(':') {
        return Ok(ScheduleExpr::NextDayAt(parse_time(&compact)?));
    }

    // Relative Ns / Nm / Nh / Nd
    if let Some(unit) = compact.chars().last() {
        let multiplier = match unit {
            's' => 1u64,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => {
                return Err(FleetError::Validation(format!(
                    "invalid schedule {expression}, examples: 10m, 1h, 2d, 14:00, +2d 18:00"
                )))
            }
        };
        let amount = compact[..compact.len() - 1].parse::<u64>().map_err(|_| {
            FleetError::Validation(format!("invalid amount in schedule {expression}"))
        })?;
        return Ok(ScheduleExpr::Relative(amount * multiplier));
    }

    Err(FleetError::Validation(format!("invalid schedule {expression}")))
}

/// Resolves the next occurrence in UTC from a base instant.
pub fn next_occurrence(
    expr: &ScheduleExpr,
    base: DateTime<Utc>,
    timezone: &str,
) -> Result<DateTime<Utc>, FleetError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| FleetError::Validation(format!("invalid timezone {timezone}")))?;

    match expr {
        ScheduleExpr::Relative(secs) => Ok(base + Duration::seconds(*secs as i64)),
        ScheduleExpr::NextDayAt(time) => {
            let candidate = local_instant(base, tz, 0, *time)?;
            if candidate > base {
                Ok(candidate)
            } else {
                local_instant(base, tz, 1, *time)
            }
        }
        ScheduleExpr::OffsetDaysAt(days, time) => {
            let candidate = local_instant(base, tz, *days as i64, *time)?;
            if candidate > base {
                Ok(candidate)
            } else {
                local_instant(base, tz, *days as i64 + 1, *time)
            }
        }
    }
}

/// Local wall-clock instant `days_ahead` days from the base date, in UTC.
///
/// DST gaps resolve to one hour later; ambiguous times take the earlier
/// offset.
fn local_instant(
    base: DateTime<Utc>,
    tz: Tz,
    days_ahead: i64,
    time: NaiveTime,
) -> Result<DateTime<Utc>, FleetError> {
    let local_date = (base.with_timezone(&tz) + Duration::days(days_ahead)).date_naive();
    let naive = local_date.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        chrono::LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    FleetError::Internal(format!("unresolvable local time {naive} in {tz}"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_relative_units() {
        assert_eq!(parse_schedule("10m").unwrap(), ScheduleExpr::Relative(600));
        assert_eq!(parse_schedule("1h").unwrap(), ScheduleExpr::Relative(3_600));
        assert_eq!(parse_schedule("2d").unwrap(), ScheduleExpr::Relative(172_800));
        assert_eq!(parse_schedule("45s").unwrap(), ScheduleExpr::Relative(45));
        assert_eq!(parse_schedule("0").unwrap(), ScheduleExpr::Relative(0));
    }

    #[test]
    fn parses_time_of_day_forms() {
        let two_pm = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        assert_eq!(parse_schedule("14:00").unwrap(), ScheduleExpr::NextDayAt(two_pm));
        assert_eq!(
            parse_schedule("+0d14:00").unwrap(),
            ScheduleExpr::OffsetDaysAt(0, two_pm)
        );
        assert_eq!(
            parse_schedule("+2d 18:00").unwrap(),
            ScheduleExpr::OffsetDaysAt(2, NaiveTime::from_hms_opt(18, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "abc", "10x", "25:00", "+d14:00", "+2d", "14h30"] {
            assert!(parse_schedule(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        for expr in [
            ScheduleExpr::Relative(600),
            ScheduleExpr::NextDayAt(NaiveTime::from_hms_opt(9, 30, 0).unwrap()),
            ScheduleExpr::OffsetDaysAt(2, NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
        ] {
            let decoded = ScheduleExpr::decode(expr.kind(), &expr.value()).unwrap();
            assert_eq!(decoded, expr);
        }
    }

    #[test]
    fn relative_adds_to_base() {
        let base = utc("2026-03-10T12:00:00Z");
        let next = next_occurrence(&ScheduleExpr::Relative(600), base, "UTC").unwrap();
        assert_eq!(next, utc("2026-03-10T12:10:00Z"));
    }

    #[test]
    fn time_of_day_today_when_still_ahead() {
        let base = utc("2026-03-10T10:00:00Z");
        let expr = parse_schedule("14:00").unwrap();
        let next = next_occurrence(&expr, base, "UTC").unwrap();
        assert_eq!(next, utc("2026-03-10T14:00:00Z"));
    }

    #[test]
    fn time_of_day_tomorrow_when_past() {
        // "today 14:00" when now is 16:00 resolves to tomorrow 14:00.
        let base = utc("2026-03-10T16:00:00Z");
        let expr = parse_schedule("14:00").unwrap();
        let next = next_occurrence(&expr, base, "UTC").unwrap();
        assert_eq!(next, utc("2026-03-11T14:00:00Z"));
    }

    #[test]
    fn offset_days_shift_when_past() {
        let base = utc("2026-03-10T19:00:00Z");
        let expr = parse_schedule("+0d 18:00").unwrap();
        let next = next_occurrence(&expr, base, "UTC").unwrap();
        assert_eq!(next, utc("2026-03-11T18:00:00Z"));

        let expr = parse_schedule("+2d 18:00").unwrap();
        let next = next_occurrence(&expr, base, "UTC").unwrap();
        assert_eq!(next, utc("2026-03-12T18:00:00Z"));
    }

    #[test]
    fn campaign_timezone_drives_wall_clock() {
        // 09:00 in São Paulo (UTC-3) is 12:00 UTC.
        let base = utc("2026-03-10T00:00:00Z");
        let expr = parse_schedule("09:00").unwrap();
        let next = next_occurrence(&expr, base, "America/Sao_Paulo").unwrap();
        assert_eq!(next, utc("2026-03-10T12:00:00Z"));
    }

    #[test]
    fn invalid_timezone_is_a_validation_error() {
        let base = utc("2026-03-10T00:00:00Z");
        let expr = parse_schedule("09:00").unwrap();
        assert!(matches!(
            next_occurrence(&expr, base, "Mars/Olympus").unwrap_err(),
            FleetError::Validation(_)
        ));
    }

    #[test]
    fn scenario_s5_step_chain_times() {
        // Steps [10m, +1d 09:00] in São Paulo: step 1 fires 10 minutes
        // after the threshold, step 2 next day 09:00 local.
        let inactive_at = utc("2026-03-10T20:00:00Z");
        let step1 = parse_schedule("10m").unwrap();
        let t1 = next_occurrence(&step1, inactive_at, "America/Sao_Paulo").unwrap();
        assert_eq!(t1, utc("2026-03-10T20:10:00Z"));

        let step2 = parse_schedule("+1d 09:00").unwrap();
        let t2 = next_occurrence(&step2, t1, "America/Sao_Paulo").unwrap();
        // 2026-03-11 09:00 America/Sao_Paulo = 12:00 UTC.
        assert_eq!(t2, utc("2026-03-11T12:00:00Z"));
    }
}
