use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Offset changes a daylight-saving transition can introduce between two local midnights.
const DST_SHIFTS_SECS: [i32; 2] = [1800, 3600];

fn is_whole_days(span: Duration) -> bool {
    span > Duration::zero() && span.num_seconds() % Duration::days(1).num_seconds() == 0
}

/// True when both ends sit exactly on midnight and the span is a whole, positive number of days.
pub fn is_all_day_span(start: NaiveDateTime, end: NaiveDateTime) -> bool {
    start.time() == NaiveTime::MIN && end.time() == NaiveTime::MIN && is_whole_days(end - start)
}

/// Display fallback over raw stored timestamps. Unparseable input is a timed event.
/// Offset-less values are read as UTC, so only explicit offsets affect the elapsed time.
pub fn is_all_day_range(start: &str, end: &str) -> bool {
    let utc = Utc.fix();
    match (parse_timestamp(start, utc), parse_timestamp(end, utc)) {
        (Some(start), Some(end)) => is_all_day_zoned(&start, &end),
        _ => false,
    }
}

/// Midnight is read in each timestamp's own offset; the elapsed time between them must be a
/// whole number of days. Across a daylight-saving change the local days still count.
pub fn is_all_day_zoned(start: &DateTime<FixedOffset>, end: &DateTime<FixedOffset>) -> bool {
    let (local_start, local_end) = (start.naive_local(), end.naive_local());
    if local_start.time() != NaiveTime::MIN || local_end.time() != NaiveTime::MIN {
        return false;
    }
    if is_whole_days(*end - *start) {
        return true;
    }
    let shift = (end.offset().local_minus_utc() - start.offset().local_minus_utc()).abs();
    DST_SHIFTS_SECS.contains(&shift) && is_whole_days(local_end - local_start)
}

/// Wall-clock reading of a timestamp in its own offset.
pub fn parse_wall_clock(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Parses a stored timestamp, reading offset-less values in `fallback`.
pub fn parse_timestamp(value: &str, fallback: FixedOffset) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value.trim()) {
        return Some(dt);
    }
    let naive = parse_wall_clock(value)?;
    fallback.from_local_datetime(&naive).single()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
}

impl EventRange {
    /// Range reported by a drag, resize or selection gesture. A missing end defaults to one
    /// hour for timed events and one day for all-day events.
    pub fn new(
        start: DateTime<FixedOffset>,
        end: Option<DateTime<FixedOffset>>,
        all_day: bool,
    ) -> Self {
        let end = end.unwrap_or_else(|| {
            if all_day {
                start + Duration::days(1)
            } else {
                start + Duration::hours(1)
            }
        });
        Self { start, end, all_day }
    }

    /// Builds a range from its endpoints, inferring the all-day flag.
    pub fn inferred(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self {
            start,
            end,
            all_day: is_all_day_zoned(&start, &end),
        }
    }

    /// All-day range covering `first` through `last` inclusive, stored with an exclusive end.
    pub fn whole_days(first: NaiveDate, last: NaiveDate, offset: FixedOffset) -> Option<Self> {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        let start = offset.from_local_datetime(&first.and_time(NaiveTime::MIN)).single()?;
        let end = offset
            .from_local_datetime(&last.succ_opt()?.and_time(NaiveTime::MIN))
            .single()?;
        Some(Self { start, end, all_day: true })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        if self.all_day {
            self.end.naive_local() - self.start.naive_local() >= Duration::days(1)
        } else {
            self.end > self.start
        }
    }
}
