//! Mapping between calendar fields and the numbered directories of a time
//! tree laid out as `YYYY/NN_month/NN_day/HH/MM/`.
//!
//! A directory takes part in the hierarchy only if its name starts with a
//! decimal number, the directory index. The index equals the calendar value
//! for every level except months, which are numbered from 1 on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Days, Duration, Local, Months, NaiveDate, NaiveDateTime, Offset,
    TimeZone, Timelike,
};
use regex::Regex;

use crate::error::{Error, Result};
use crate::time_block::TimeBlock;

static DIR_INDEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("Invalid regex for directory index"));

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

const NUMBERED_MONTH_NAMES: [&str; 12] = [
    "01_jan", "02_feb", "03_mar", "04_apr", "05_may", "06_jun", "07_jul", "08_aug", "09_sep",
    "10_oct", "11_nov", "12_dec",
];

/// One rung of the time hierarchy, ordered from the root down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeLevel {
    All,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    File,
    None,
}

impl TimeLevel {
    /// The levels that map onto calendar fields, from coarsest to finest.
    pub const CALENDAR: [TimeLevel; 5] = [
        TimeLevel::Year,
        TimeLevel::Month,
        TimeLevel::Day,
        TimeLevel::Hour,
        TimeLevel::Minute,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeLevel::All => "All",
            TimeLevel::Year => "Year",
            TimeLevel::Month => "Month",
            TimeLevel::Day => "Day",
            TimeLevel::Hour => "Hour",
            TimeLevel::Minute => "Minute",
            TimeLevel::File => "File",
            TimeLevel::None => "None",
        }
    }

    /// The calendar field backing this level, or `None` for the sentinel
    /// levels.
    pub fn calendar_field(self) -> Option<CalendarField> {
        match self {
            TimeLevel::Year => Some(CalendarField::Year),
            TimeLevel::Month => Some(CalendarField::Month),
            TimeLevel::Day => Some(CalendarField::DayOfMonth),
            TimeLevel::Hour => Some(CalendarField::HourOfDay),
            TimeLevel::Minute => Some(CalendarField::Minute),
            _ => None,
        }
    }

    pub fn is_calendar(self) -> bool {
        self.calendar_field().is_some()
    }

    /// The level one rung below this one. `None` is its own successor.
    pub fn next(self) -> TimeLevel {
        match self {
            TimeLevel::All => TimeLevel::Year,
            TimeLevel::Year => TimeLevel::Month,
            TimeLevel::Month => TimeLevel::Day,
            TimeLevel::Day => TimeLevel::Hour,
            TimeLevel::Hour => TimeLevel::Minute,
            TimeLevel::Minute => TimeLevel::File,
            TimeLevel::File | TimeLevel::None => TimeLevel::None,
        }
    }
}

/// Calendar fields used by the time hierarchy. Day-of-week only decorates
/// day directory names and has no field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarField {
    Year,
    /// Zero-based, January is 0.
    Month,
    DayOfMonth,
    HourOfDay,
    Minute,
}

/// A broken-down calendar time plus whether daylight saving is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarSnapshot {
    pub datetime: NaiveDateTime,
    pub dst: bool,
}

impl CalendarSnapshot {
    pub fn new(datetime: NaiveDateTime, dst: bool) -> Self {
        CalendarSnapshot { datetime, dst }
    }

    pub fn get(&self, field: CalendarField) -> i64 {
        let dt = &self.datetime;
        match field {
            CalendarField::Year => i64::from(dt.year()),
            CalendarField::Month => i64::from(dt.month0()),
            CalendarField::DayOfMonth => i64::from(dt.day()),
            CalendarField::HourOfDay => i64::from(dt.hour()),
            CalendarField::Minute => i64::from(dt.minute()),
        }
    }
}

/// The time zone in which directory names and timestamps are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Zone {
    #[default]
    Utc,
    Local,
}

impl Zone {
    pub fn snapshot(self, micros: i64) -> Option<CalendarSnapshot> {
        let utc = DateTime::from_timestamp_micros(micros)?;
        match self {
            Zone::Utc => Some(CalendarSnapshot::new(utc.naive_utc(), false)),
            Zone::Local => {
                let local = utc.with_timezone(&Local);
                let offset = local.offset().fix().local_minus_utc();
                let dst = local_standard_offset(local.year()).is_some_and(|std| offset > std);
                Some(CalendarSnapshot::new(local.naive_local(), dst))
            }
        }
    }

    /// Converts a wall-clock time in this zone to microseconds. Wall-clock
    /// times skipped by a DST transition resolve one hour later; repeated
    /// ones resolve to the earlier instant.
    pub fn to_micros(self, datetime: &NaiveDateTime) -> Option<i64> {
        match self {
            Zone::Utc => Some(datetime.and_utc().timestamp_micros()),
            Zone::Local => Local
                .from_local_datetime(datetime)
                .earliest()
                .or_else(|| {
                    let shifted = datetime.checked_add_signed(Duration::hours(1))?;
                    Local.from_local_datetime(&shifted).earliest()
                })
                .map(|dt| dt.timestamp_micros()),
        }
    }
}

fn local_standard_offset(year: i32) -> Option<i32> {
    let offset_at = |month: u32| -> Option<i32> {
        let naive = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
        Some(Local.from_utc_datetime(&naive).offset().fix().local_minus_utc())
    };
    Some(offset_at(1)?.min(offset_at(7)?))
}

/// Converts a calendar value to the index used in directory names.
pub fn directory_index_from_calendar_value(level: TimeLevel, value: i64) -> i64 {
    if level == TimeLevel::Month {
        return value + 1;
    }
    value
}

/// Inverse of [`directory_index_from_calendar_value`].
pub fn calendar_value_from_directory_index(level: TimeLevel, index: i64) -> i64 {
    if level == TimeLevel::Month {
        return index - 1;
    }
    index
}

/// The directory index of `snapshot` at `level`, if `level` is a calendar
/// level.
pub fn directory_index(snapshot: &CalendarSnapshot, level: TimeLevel) -> Option<i64> {
    let field = level.calendar_field()?;
    Some(directory_index_from_calendar_value(
        level,
        snapshot.get(field),
    ))
}

/// The value a field takes at the start of its range.
pub fn minimum_calendar_value(level: TimeLevel) -> i64 {
    match level {
        TimeLevel::Year => 1970,
        TimeLevel::Day => 1,
        _ => 0,
    }
}

/// The calendar base of the root of a tree: every field at its minimum.
pub fn zeroed_base() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Formats the canonical directory name for `level`, or an empty string for
/// non-calendar levels.
pub fn timed_directory_name(snapshot: &CalendarSnapshot, level: TimeLevel) -> String {
    let dt = &snapshot.datetime;
    match level {
        TimeLevel::Year => format!("{:04}", dt.year()),
        TimeLevel::Month => NUMBERED_MONTH_NAMES[dt.month0() as usize].to_string(),
        TimeLevel::Day => format!(
            "{:02}_{}",
            dt.day(),
            DAY_NAMES[dt.weekday().num_days_from_sunday() as usize]
        ),
        TimeLevel::Hour => format!("{:02}", dt.hour()),
        TimeLevel::Minute => format!("{:02}", dt.minute()),
        _ => String::new(),
    }
}

/// Extracts the leading decimal number of a directory name, e.g. 2 for
/// `02_feb`.
pub fn parse_directory_index(name: &str) -> Option<i64> {
    let captures = DIR_INDEX_PATTERN.captures(name)?;
    let digits = captures.get(1)?.as_str();
    // Runs that overflow a u32 are not indices.
    digits.parse::<u32>().ok().map(i64::from)
}

/// A timestamp suitable for embedding in a file name: `yyyy_MM_dd-HHmm`,
/// suffixed with `d` under daylight saving time.
pub fn filename_timestamp(snapshot: &CalendarSnapshot) -> String {
    let dt = &snapshot.datetime;
    format!(
        "{:04}_{:02}_{:02}-{:02}{:02}{}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        if snapshot.dst { "d" } else { "" }
    )
}

fn with_field(base: &NaiveDateTime, field: CalendarField, value: i64) -> Option<NaiveDateTime> {
    match field {
        CalendarField::Year => base.with_year(i32::try_from(value).ok()?),
        CalendarField::Month => base.with_month0(u32::try_from(value).ok()?),
        CalendarField::DayOfMonth => base.with_day(u32::try_from(value).ok()?),
        CalendarField::HourOfDay => base.with_hour(u32::try_from(value).ok()?),
        CalendarField::Minute => base.with_minute(u32::try_from(value).ok()?),
    }
}

fn advance(dt: &NaiveDateTime, field: CalendarField) -> Option<NaiveDateTime> {
    match field {
        CalendarField::Year => dt.with_year(dt.year().checked_add(1)?),
        CalendarField::Month => dt.checked_add_months(Months::new(1)),
        CalendarField::DayOfMonth => dt.checked_add_days(Days::new(1)),
        CalendarField::HourOfDay => dt.checked_add_signed(Duration::hours(1)),
        CalendarField::Minute => dt.checked_add_signed(Duration::minutes(1)),
    }
}

/// Computes the calendar base and span of a directory at `level` with the
/// given index, below a parent whose span starts at `parent_base`.
///
/// `parent_base` must have every field finer than the parent's level at its
/// minimum. Returns `None` when `level` is not a calendar level or the index
/// is not a valid value for it, in which case the directory lies outside
/// the hierarchy.
pub fn child_span(
    zone: Zone,
    parent_base: &NaiveDateTime,
    level: TimeLevel,
    index: i64,
) -> Option<(NaiveDateTime, TimeBlock)> {
    let field = level.calendar_field()?;
    let value = calendar_value_from_directory_index(level, index);
    let base = with_field(parent_base, field, value)?;
    let stop = advance(&base, field)?;
    let span = TimeBlock::from_micros(zone.to_micros(&base)?, zone.to_micros(&stop)?);
    Some((base, span))
}

/// The minute-level relative path for `micros`, e.g.
/// `2020/01_jan/02_thu/03/04`.
pub fn data_path(zone: Zone, micros: i64) -> Option<PathBuf> {
    let snapshot = zone.snapshot(micros)?;
    Some(
        TimeLevel::CALENDAR
            .iter()
            .map(|&level| timed_directory_name(&snapshot, level))
            .collect(),
    )
}

/// Returns the minute-level directory for `micros` under `root`, creating
/// any missing levels.
///
/// An existing directory with the right index is reused even if its name
/// differs from the canonical one (`01` for `01_jan`). When several match,
/// the canonical name wins, then the alphabetically first.
pub fn create_data_directory(root: &Path, zone: Zone, micros: i64) -> Result<PathBuf> {
    let snapshot = zone
        .snapshot(micros)
        .ok_or_else(|| Error::Pattern(format!("timestamp out of range: {micros}")))?;
    let mut dir = root.to_path_buf();

    for level in TimeLevel::CALENDAR {
        let name = timed_directory_name(&snapshot, level);
        let index = directory_index(&snapshot, level);
        let mut candidates = indexed_subdirectories(&dir, index);
        candidates.sort();

        let next = match candidates.len() {
            0 => dir.join(&name),
            1 => candidates.remove(0),
            _ => {
                let exact = candidates
                    .iter()
                    .position(|c| c.file_name().is_some_and(|n| n == name.as_str()))
                    .unwrap_or(0);
                candidates.swap_remove(exact)
            }
        };

        if !next.is_dir() {
            log::debug!("creating {}", next.display());
            fs::create_dir(&next).map_err(|e| Error::io(&next, e))?;
        }
        dir = next;
    }

    Ok(dir)
}

fn indexed_subdirectories(dir: &Path, index: Option<i64>) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_directory_index);
            parsed.is_some() && parsed == index
        })
        .collect()
}

/// Picks a file name that does not yet exist inside the minute directory for
/// `micros`: `NN_channel_yyyy_MM_dd-HHmm.ext`, then `...ext-1`, `...ext-2`.
pub fn new_data_file(
    root: &Path,
    zone: Zone,
    micros: i64,
    channel_id: u32,
    channel_name: &str,
    extension: &str,
) -> Result<PathBuf> {
    let dir = create_data_directory(root, zone, micros)?;
    let snapshot = zone
        .snapshot(micros)
        .ok_or_else(|| Error::Pattern(format!("timestamp out of range: {micros}")))?;
    let stem = format!(
        "{:02}_{}_{}{}",
        channel_id,
        channel_name,
        filename_timestamp(&snapshot),
        extension
    );

    let mut file = dir.join(&stem);
    let mut attempt = 0;
    while file.exists() {
        attempt += 1;
        file = dir.join(format!("{stem}-{attempt}"));
    }
    Ok(file)
}

/// Climbs from `path` to the nearest ancestor directory whose name carries no
/// index, i.e. the root of the indexed tree `path` lives in.
pub fn find_index_root(path: &Path) -> Option<PathBuf> {
    let mut dir = if path.is_file() { path.parent()? } else { path };
    while dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_directory_index)
        .is_some()
    {
        dir = dir.parent()?;
    }
    Some(dir.to_path_buf())
}

/// Best-effort span of `path` derived from the indices of the directories
/// between it and [`find_index_root`]. `None` if no indexed directory is
/// involved.
pub fn time_of_path(zone: Zone, path: &Path) -> Option<TimeBlock> {
    let root = find_index_root(path)?;
    let dir = if path.is_file() { path.parent()? } else { path };
    let relative = dir.strip_prefix(&root).ok()?;

    let mut base = zeroed_base();
    let mut span = None;
    let levels = TimeLevel::CALENDAR.iter();
    for (component, &level) in relative.components().zip(levels) {
        let index = component.as_os_str().to_str().and_then(parse_directory_index)?;
        let (child_base, child) = child_span(zone, &base, level, index)?;
        base = child_base;
        span = Some(child);
    }
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> CalendarSnapshot {
        let dt = NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, 0))
            .expect("valid date");
        CalendarSnapshot::new(dt, false)
    }

    fn micros(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        snapshot(y, mo, d, h, mi).datetime.and_utc().timestamp_micros()
    }

    #[test]
    fn month_index_is_inverse() {
        for m in 0..12 {
            let index = directory_index_from_calendar_value(TimeLevel::Month, m);
            assert_eq!(index, m + 1);
            assert_eq!(calendar_value_from_directory_index(TimeLevel::Month, index), m);
        }
        assert_eq!(directory_index_from_calendar_value(TimeLevel::Day, 7), 7);
        assert_eq!(calendar_value_from_directory_index(TimeLevel::Hour, 23), 23);
    }

    #[test]
    fn calendar_fields_only_for_calendar_levels() {
        assert_eq!(TimeLevel::Year.calendar_field(), Some(CalendarField::Year));
        assert_eq!(TimeLevel::Minute.calendar_field(), Some(CalendarField::Minute));
        assert_eq!(TimeLevel::All.calendar_field(), None);
        assert_eq!(TimeLevel::File.calendar_field(), None);
        assert_eq!(TimeLevel::None.calendar_field(), None);
        assert!(TimeLevel::All < TimeLevel::Year && TimeLevel::File < TimeLevel::None);

        assert!(TimeLevel::CALENDAR.iter().all(|l| l.is_calendar()));
        assert!(!TimeLevel::All.is_calendar() && !TimeLevel::None.is_calendar());
        assert_eq!(TimeLevel::Hour.label(), "Hour");
    }

    #[test]
    fn minimum_values() {
        assert_eq!(minimum_calendar_value(TimeLevel::Year), 1970);
        assert_eq!(minimum_calendar_value(TimeLevel::Month), 0);
        assert_eq!(minimum_calendar_value(TimeLevel::Day), 1);
        assert_eq!(minimum_calendar_value(TimeLevel::Hour), 0);
        assert_eq!(minimum_calendar_value(TimeLevel::Minute), 0);
    }

    #[test]
    fn directory_names() {
        let snap = snapshot(2020, 1, 2, 3, 4);
        assert_eq!(timed_directory_name(&snap, TimeLevel::Year), "2020");
        assert_eq!(timed_directory_name(&snap, TimeLevel::Month), "01_jan");
        assert_eq!(timed_directory_name(&snap, TimeLevel::Day), "02_thu");
        assert_eq!(timed_directory_name(&snap, TimeLevel::Hour), "03");
        assert_eq!(timed_directory_name(&snap, TimeLevel::Minute), "04");
        assert_eq!(timed_directory_name(&snap, TimeLevel::File), "");

        let snap = snapshot(2021, 12, 26, 23, 59);
        assert_eq!(timed_directory_name(&snap, TimeLevel::Month), "12_dec");
        assert_eq!(timed_directory_name(&snap, TimeLevel::Day), "26_sun");
    }

    #[test]
    fn parses_leading_digits_only() {
        assert_eq!(parse_directory_index("02_feb"), Some(2));
        assert_eq!(parse_directory_index("2020"), Some(2020));
        assert_eq!(parse_directory_index("07"), Some(7));
        assert_eq!(parse_directory_index("feb_02"), None);
        assert_eq!(parse_directory_index(""), None);
        assert_eq!(parse_directory_index("99999999999999"), None);
    }

    #[test]
    fn filename_timestamp_marks_dst() {
        let mut snap = snapshot(2020, 7, 9, 8, 5);
        assert_eq!(filename_timestamp(&snap), "2020_07_09-0805");
        snap.dst = true;
        assert_eq!(filename_timestamp(&snap), "2020_07_09-0805d");
    }

    #[test]
    fn child_spans_nest() {
        let zone = Zone::Utc;
        let (year_base, year) = child_span(zone, &zeroed_base(), TimeLevel::Year, 2020).unwrap();
        assert_eq!(year.start(), micros(2020, 1, 1, 0, 0));
        assert_eq!(year.stop(), micros(2021, 1, 1, 0, 0));

        let (month_base, month) = child_span(zone, &year_base, TimeLevel::Month, 2).unwrap();
        assert_eq!(month.start(), micros(2020, 2, 1, 0, 0));
        assert_eq!(month.stop(), micros(2020, 3, 1, 0, 0));

        let (_, day) = child_span(zone, &month_base, TimeLevel::Day, 29).unwrap();
        assert_eq!(day.start(), micros(2020, 2, 29, 0, 0));
        assert_eq!(day.span(), 86_400_000_000);

        assert!(child_span(zone, &month_base, TimeLevel::Day, 30).is_none());
        assert!(child_span(zone, &year_base, TimeLevel::Month, 13).is_none());
        assert!(child_span(zone, &year_base, TimeLevel::Month, 0).is_none());
        assert!(child_span(zone, &year_base, TimeLevel::File, 1).is_none());
    }

    #[test]
    fn sibling_spans_do_not_leak() {
        let zone = Zone::Utc;
        let (year_base, _) = child_span(zone, &zeroed_base(), TimeLevel::Year, 2019).unwrap();
        let (dec_base, _) = child_span(zone, &year_base, TimeLevel::Month, 12).unwrap();
        let (_, d31) = child_span(zone, &dec_base, TimeLevel::Day, 31).unwrap();
        assert_eq!(d31.start(), micros(2019, 12, 31, 0, 0));

        let (_, jan) = child_span(zone, &year_base, TimeLevel::Month, 1).unwrap();
        assert_eq!(jan.start(), micros(2019, 1, 1, 0, 0));
    }

    #[test]
    fn data_path_is_minute_level() {
        let path = data_path(Zone::Utc, micros(2020, 1, 2, 3, 4)).unwrap();
        assert_eq!(path, PathBuf::from("2020/01_jan/02_thu/03/04"));
    }

    #[test]
    fn create_data_directory_reuses_indexed_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("2020/01")).unwrap();

        let dir = create_data_directory(tmp.path(), Zone::Utc, micros(2020, 1, 2, 3, 4)).unwrap();
        assert_eq!(dir, tmp.path().join("2020/01/02_thu/03/04"));
        assert!(dir.is_dir());
    }

    #[test]
    fn new_data_file_avoids_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let t = micros(2020, 1, 2, 3, 4);
        let first = new_data_file(tmp.path(), Zone::Utc, t, 3, "cam", ".jpg").unwrap();
        assert!(first.ends_with("03_cam_2020_01_02-0304.jpg"));

        fs::write(&first, b"x").unwrap();
        let second = new_data_file(tmp.path(), Zone::Utc, t, 3, "cam", ".jpg").unwrap();
        assert!(second.ends_with("03_cam_2020_01_02-0304.jpg-1"));
    }

    #[test]
    fn time_of_path_uses_deepest_index() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        let minute = root.join("2020/01_jan/02_thu/03/04");
        fs::create_dir_all(&minute).unwrap();
        let file = minute.join("21_kitchen.jpg");
        fs::write(&file, b"x").unwrap();

        assert_eq!(find_index_root(&file), Some(root.clone()));
        let span = time_of_path(Zone::Utc, &file).unwrap();
        assert_eq!(span.start(), micros(2020, 1, 2, 3, 4));
        assert_eq!(span.span(), 60_000_000);

        let month = time_of_path(Zone::Utc, &root.join("2020/01_jan")).unwrap();
        assert_eq!(month.stop(), micros(2020, 2, 1, 0, 0));
        assert_eq!(time_of_path(Zone::Utc, &root), None);
    }
}
