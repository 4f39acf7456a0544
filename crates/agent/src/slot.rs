//! Resolves free-text day and time mentions into a UTC slot.
//!
//! Days: `today`, `tomorrow`, `[this|next] <weekday>`, ISO dates and
//! day-month pairs. Times: `3pm`, `3:30 pm`, `15:00`, `noon` and the
//! `morning`/`afternoon`/`evening` periods.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc, Weekday};
use regex::{Captures, Regex};

use nurture_core::domain::goal::ProposedSlot;

const MONTH: &str = concat!(
    r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?",
    r"|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)",
);

struct DayPatterns {
    relative: Regex,
    weekday: Regex,
    iso_date: Regex,
    day_month: Regex,
    month_day: Regex,
}

static DAY_PATTERNS: LazyLock<DayPatterns> = LazyLock::new(|| DayPatterns {
    relative: Regex::new(r"(?i)\b(today|tonight|tomorrow)\b").expect("relative day regex"),
    weekday: Regex::new(
        concat!(
            r"(?i)\b(?:(this|next|coming)\s+)?",
            r"(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
        ),
    )
    .expect("weekday regex"),
    iso_date: Regex::new(r"\b([0-9]{4})-([0-9]{2})-([0-9]{2})\b").expect("iso date regex"),
    day_month: Regex::new(&format!(
        r"(?i)\b([0-9]{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{MONTH}\b"
    ))
    .expect("day-month regex"),
    month_day: Regex::new(&format!(r"(?i)\b{MONTH}\s+([0-9]{{1,2}})(?:st|nd|rd|th)?\b"))
        .expect("month-day regex"),
});

struct TimePatterns {
    meridiem: Regex,
    clock: Regex,
    noon: Regex,
    period: Regex,
}

static TIME_PATTERNS: LazyLock<TimePatterns> = LazyLock::new(|| TimePatterns {
    meridiem: Regex::new(r"(?i)\b([0-9]{1,2})(?::([0-5][0-9]))?\s*([ap])\.?m\b")
        .expect("meridiem regex"),
    clock: Regex::new(r"\b([01]?[0-9]|2[0-3]):([0-5][0-9])\b").expect("clock regex"),
    noon: Regex::new(r"(?i)\b(?:noon|midday)\b").expect("noon regex"),
    period: Regex::new(r"(?i)\b(morning|afternoon|evening)\b").expect("period regex"),
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DayRef {
    Offset(u64),
    Weekday { day: Weekday, next: bool },
    Date(NaiveDate),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn of(captures: &Captures<'_>) -> Option<Self> {
        captures.get(0).map(|whole| Self { start: whole.start(), end: whole.end() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TimeOfDay {
    hour: u32,
    minute: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotParser {
    default_hour: u32,
}

impl Default for SlotParser {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SlotParser {
    pub fn new(default_hour: u32) -> Self {
        Self { default_hour: default_hour.min(23) }
    }

    pub fn parse(&self, text: &str, received_at: DateTime<Utc>) -> Option<ProposedSlot> {
        let day = find_day(text, received_at.date_naive());
        let time = find_time(text);

        let starts_at = match (day, time) {
            (None, None) => return None,
            (Some((day, _)), time) => {
                let time = time
                    .map(|(time, _)| time)
                    .unwrap_or(TimeOfDay { hour: self.default_hour, minute: 0 });
                resolve_day(day, time, received_at)?
            }
            (None, Some((time, _))) => {
                let today = at(received_at.date_naive(), time)?;
                if today > received_at {
                    today
                } else {
                    at(received_at.date_naive().checked_add_days(Days::new(1))?, time)?
                }
            }
        };

        let spans = [day.map(|(_, span)| span), time.map(|(_, span)| span)];
        let start = spans.iter().flatten().map(|span| span.start).min()?;
        let end = spans.iter().flatten().map(|span| span.end).max()?;
        let phrase = text.get(start..end)?.to_lowercase();
        let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        Some(ProposedSlot { starts_at, phrase })
    }
}

/// Earliest day mention in `text`.
fn find_day(text: &str, today: NaiveDate) -> Option<(DayRef, Span)> {
    let patterns = &*DAY_PATTERNS;
    let candidates = [
        patterns.relative.captures_iter(text).find_map(|caps| {
            let offset = if caps[1].eq_ignore_ascii_case("tomorrow") { 1 } else { 0 };
            Some((DayRef::Offset(offset), Span::of(&caps)?))
        }),
        patterns.weekday.captures_iter(text).find_map(|caps| {
            let day = caps[2].to_lowercase().parse::<Weekday>().ok()?;
            let next =
                caps.get(1).is_some_and(|prefix| prefix.as_str().eq_ignore_ascii_case("next"));
            Some((DayRef::Weekday { day, next }, Span::of(&caps)?))
        }),
        patterns.iso_date.captures_iter(text).find_map(|caps| {
            let date = NaiveDate::from_ymd_opt(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            )?;
            Some((DayRef::Date(date), Span::of(&caps)?))
        }),
        patterns.day_month.captures_iter(text).find_map(|caps| {
            let date = upcoming_date(today, month(&caps[2])?, day_number(&caps[1])?)?;
            Some((DayRef::Date(date), Span::of(&caps)?))
        }),
        patterns.month_day.captures_iter(text).find_map(|caps| {
            let date = upcoming_date(today, month(&caps[1])?, day_number(&caps[2])?)?;
            Some((DayRef::Date(date), Span::of(&caps)?))
        }),
    ];
    earliest(candidates)
}

/// Earliest explicit time, falling back to a period of the day.
fn find_time(text: &str) -> Option<(TimeOfDay, Span)> {
    let patterns = &*TIME_PATTERNS;
    let explicit = [
        patterns.meridiem.captures_iter(text).find_map(|caps| {
            let hour = caps[1].parse::<u32>().ok()?;
            let minute = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
            let pm = caps[3].eq_ignore_ascii_case("p");
            Some((meridiem(hour, minute, pm)?, Span::of(&caps)?))
        }),
        patterns.clock.captures_iter(text).find_map(|caps| {
            let time = TimeOfDay { hour: caps[1].parse().ok()?, minute: caps[2].parse().ok()? };
            Some((time, Span::of(&caps)?))
        }),
        patterns.noon.captures_iter(text).find_map(|caps| {
            Some((TimeOfDay { hour: 12, minute: 0 }, Span::of(&caps)?))
        }),
    ];
    earliest(explicit).or_else(|| {
        patterns.period.captures_iter(text).find_map(|caps| {
            let hour = match caps[1].to_lowercase().as_str() {
                "morning" => 10,
                "afternoon" => 15,
                _ => 18,
            };
            Some((TimeOfDay { hour, minute: 0 }, Span::of(&caps)?))
        })
    })
}

/// Leftmost candidate; on equal starts the earlier pattern wins.
fn earliest<T, const N: usize>(candidates: [Option<(T, Span)>; N]) -> Option<(T, Span)> {
    candidates.into_iter().flatten().fold(None, |best, candidate| match best {
        Some(best) if best.1.start <= candidate.1.start => Some(best),
        _ => Some(candidate),
    })
}

fn resolve_day(day: DayRef, time: TimeOfDay, received_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = received_at.date_naive();
    match day {
        DayRef::Offset(offset) => at(today.checked_add_days(Days::new(offset))?, time),
        DayRef::Date(date) => at(date, time),
        DayRef::Weekday { day, next } => {
            let ahead =
                (7 + day.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
            let mut candidate = at(today.checked_add_days(Days::new(u64::from(ahead)))?, time)?;
            if candidate <= received_at {
                candidate = candidate.checked_add_days(Days::new(7))?;
            }
            if next {
                candidate = candidate.checked_add_days(Days::new(7))?;
            }
            Some(candidate)
        }
    }
}

fn at(date: NaiveDate, time: TimeOfDay) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(time.hour, time.minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// The given day-month this year, or next year once it has passed.
fn upcoming_date(today: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year >= today {
        Some(this_year)
    } else {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    }
}

fn month(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn day_number(digits: &str) -> Option<u32> {
    let day = digits.parse::<u32>().ok()?;
    (1..=31).contains(&day).then_some(day)
}

fn meridiem(hour: u32, minute: u32, pm: bool) -> Option<TimeOfDay> {
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let hour = if pm { hour % 12 + 12 } else { hour % 12 };
    Some(TimeOfDay { hour, minute })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::SlotParser;

    // A Wednesday.
    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).single().expect("timestamp")
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("timestamp")
    }

    #[test]
    fn weekday_with_time_resolves_to_upcoming_day() {
        let slot = SlotParser::default()
            .parse("Can we book a visit this Saturday at 3pm?", received())
            .expect("slot");
        assert_eq!(slot.starts_at, utc(2026, 10, 17, 15, 0));
        assert_eq!(slot.phrase, "this saturday at 3pm");
    }

    #[test]
    fn next_weekday_adds_a_week_and_same_day_rolls_forward() {
        let parser = SlotParser::default();
        assert_eq!(
            parser.parse("next saturday 10:30", received()).map(|s| s.starts_at),
            Some(utc(2026, 10, 24, 10, 30))
        );
        // Wednesday 9am has already passed at 9:30.
        assert_eq!(
            parser.parse("wednesday at 9am", received()).map(|s| s.starts_at),
            Some(utc(2026, 10, 21, 9, 0))
        );
        assert_eq!(
            parser.parse("wednesday afternoon", received()).map(|s| s.starts_at),
            Some(utc(2026, 10, 14, 15, 0))
        );
    }

    #[test]
    fn days_without_time_use_the_default_hour() {
        let parser = SlotParser::new(11);
        let starts = |text: &str| parser.parse(text, received()).map(|s| s.starts_at);
        assert_eq!(starts("tomorrow works"), Some(utc(2026, 10, 15, 11, 0)));
        assert_eq!(starts("How about 2026-10-20?"), Some(utc(2026, 10, 20, 11, 0)));
        assert_eq!(starts("on the 18th of October"), Some(utc(2026, 10, 18, 11, 0)));
        // Already passed this year.
        assert_eq!(starts("Feb 3"), Some(utc(2027, 2, 3, 11, 0)));
    }

    #[test]
    fn time_without_day_picks_today_or_tomorrow() {
        let parser = SlotParser::default();
        assert_eq!(
            parser.parse("around 3:30 pm", received()).map(|s| s.starts_at),
            Some(utc(2026, 10, 14, 15, 30))
        );
        assert_eq!(
            parser.parse("8am please", received()).map(|s| s.starts_at),
            Some(utc(2026, 10, 15, 8, 0))
        );
        assert_eq!(parser.parse("noon", received()).map(|s| s.phrase), Some("noon".to_string()));
    }

    #[test]
    fn dotted_meridiem_and_period_phrases_are_kept_in_the_phrase() {
        let parser = SlotParser::default();
        let dotted = parser.parse("Let's meet Friday at 3 p.m., okay?", received()).expect("slot");
        assert_eq!(dotted.starts_at, utc(2026, 10, 16, 15, 0));
        assert_eq!(dotted.phrase, "friday at 3 p.m");

        let period = parser.parse("Tomorrow  Morning suits me", received()).expect("slot");
        assert_eq!(period.starts_at, utc(2026, 10, 15, 10, 0));
        assert_eq!(period.phrase, "tomorrow morning");
    }

    #[test]
    fn text_without_dates_yields_nothing() {
        let parser = SlotParser::default();
        assert!(parser.parse("I'd like to visit sometime", received()).is_none());
        assert!(parser.parse("How many 2-bed units are under $500k?", received()).is_none());
        assert!(parser.parse("Is 13pm free?", received()).is_none());
        assert!(parser.parse("Do the 2 amenities decks face the sea?", received()).is_none());
    }
}
