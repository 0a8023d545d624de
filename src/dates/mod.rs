use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

/// Calendar interval covered by one raw date cell. Start and end coincide
/// for daily dates and span a week for ISO-week dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateInterval {
    pub fn single(day: NaiveDate) -> Self {
        DateInterval {
            start: day,
            end: day,
        }
    }
}

static WEEK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-W(\d{2})").unwrap());
static DMY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})-(\d{2})-(\d{4})").unwrap());
static YMD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").unwrap());

/// Fallback formats seen across the feeds (mostly CSSE "Last Update" cells).
static FLEX_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m-%d-%Y %H:%M",
    "%m-%d-%y %H:%M",
    "%m-%d-%Y %H:%M:%S",
    "%m-%d-%y %H:%M:%S",
];

/// Parse a raw date cell into a `DateInterval`. `None` means the cell is
/// unparseable and the caller should drop the row, never the file.
///
/// Encodings are tried in order: ISO week `YYYY-W##`, `DD-MM-YYYY`,
/// `YYYY-MM-DD`, then the flexible fallback formats. `/` separators are
/// normalized to `-` first, so `2021/W05` and `22/01/2021` both work.
pub fn normalize(raw: &str) -> Option<DateInterval> {
    let raw = raw.trim().replace('/', "-");
    if raw.is_empty() {
        return None;
    }

    if let Some(caps) = WEEK_RE.captures(&raw) {
        let year: i32 = caps[1].parse().ok()?;
        let week: u32 = caps[2].parse().ok()?;
        // The feeds number their weeks one ahead of the ISO calendar; week
        // 1 has no predecessor and is treated as unparseable.
        let start = NaiveDate::from_isoywd_opt(year, week.checked_sub(1)?, Weekday::Mon)?;
        // The week interval ends 6.9 days after its start, which truncates
        // to the 6th calendar day. Downstream indices depend on this exact
        // end date; do not "fix" it to a 7-day week.
        return Some(DateInterval {
            start,
            end: start + Duration::days(6),
        });
    }

    if let Some(caps) = DMY_RE.captures(&raw) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(DateInterval::single(date));
        }
    }

    if let Some(caps) = YMD_RE.captures(&raw) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(DateInterval::single(date));
        }
    }

    parse_flexible(&raw).map(DateInterval::single)
}

fn parse_flexible(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in FLEX_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in &["%m-%d-%Y", "%m-%d-%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_week_spans_six_days_from_monday() {
        let iv = normalize("2021-W05").unwrap();
        // week 5 in the feed is ISO week 4
        assert_eq!(iv.start, ymd(2021, 1, 25));
        assert_eq!(iv.start.weekday(), Weekday::Mon);
        assert_eq!(iv.end - iv.start, Duration::days(6));
        assert_eq!(iv.end, ymd(2021, 1, 31));
    }

    #[test]
    fn iso_week_accepts_slash_separator() {
        assert_eq!(normalize("2021/W05"), normalize("2021-W05"));
    }

    #[test]
    fn iso_week_starts_are_always_mondays() {
        for raw in ["2020-W10", "2021-W02", "2021-W33", "2022-W52"] {
            let iv = normalize(raw).unwrap();
            assert_eq!(iv.start.weekday(), Weekday::Mon, "{}", raw);
            assert_eq!(iv.end - iv.start, Duration::days(6), "{}", raw);
        }
    }

    #[test]
    fn week_one_has_no_predecessor() {
        assert_eq!(normalize("2021-W01"), None);
    }

    #[test]
    fn day_month_year_is_rewritten() {
        let iv = normalize("22-01-2021").unwrap();
        assert_eq!(iv, DateInterval::single(ymd(2021, 1, 22)));
        assert_eq!(normalize("22/01/2021").unwrap(), iv);
    }

    #[test]
    fn iso_calendar_round_trips() {
        let iv = normalize("2021-03-15").unwrap();
        assert_eq!(iv.start, ymd(2021, 3, 15));
        assert_eq!(iv.end, ymd(2021, 3, 15));
    }

    #[test]
    fn csse_last_update_styles_fall_through() {
        assert_eq!(
            normalize("1/22/2020 17:00"),
            Some(DateInterval::single(ymd(2020, 1, 22)))
        );
        assert_eq!(
            normalize("2020-02-02T23:43:02"),
            Some(DateInterval::single(ymd(2020, 2, 2)))
        );
    }

    #[test]
    fn garbage_is_unparseable() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("  "), None);
        assert_eq!(normalize("not a date"), None);
        assert_eq!(normalize("2021-13-40"), None);
        assert_eq!(normalize("53"), None);
    }
}
