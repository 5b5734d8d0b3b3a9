//! Timeline retention policy
//!
//! Derives a set of timepoints from `(period, count)` pairs anchored to a
//! reference instant, and keeps, for each timepoint, the earliest snapshot
//! at or after it.

use crate::policy::{default_filter, newest_sync_point};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use snapsync_core::{Error, Result, SnapshotRecord};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A retention period unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Year,
    Month,
    Week,
    Day,
    Hour,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Year => "year",
            Period::Month => "month",
            Period::Week => "week",
            Period::Day => "day",
            Period::Hour => "hour",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "year" => Ok(Period::Year),
            "month" => Ok(Period::Month),
            "week" => Ok(Period::Week),
            "day" => Ok(Period::Day),
            "hour" => Ok(Period::Hour),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown period name '{other}'"
            ))),
        }
    }
}

/// Timeline policy: keep one snapshot per period boundary
#[derive(Debug, Clone)]
pub struct TimelinePolicy {
    reference: DateTime<Utc>,
    periods: Vec<(Period, u32)>,
    timeline: BTreeSet<DateTime<Utc>>,
}

impl TimelinePolicy {
    /// An empty policy anchored at `reference`
    ///
    /// The reference is injectable so tests and repeated evaluations are
    /// deterministic; production callers pass `Utc::now()`.
    pub fn new(reference: DateTime<Utc>) -> Self {
        Self {
            reference,
            periods: Vec::new(),
            timeline: BTreeSet::new(),
        }
    }

    /// Parse a flat `[period, count, period, count, ...]` options list
    pub fn from_config(reference: DateTime<Utc>, options: &[String]) -> Result<Self> {
        if options.len() % 2 != 0 {
            return Err(Error::InvalidConfiguration(
                "timeline options must be period/count pairs".into(),
            ));
        }
        let mut policy = Self::new(reference);
        for pair in options.chunks(2) {
            let period: Period = pair[0].parse()?;
            let count: u32 = pair[1].parse().map_err(|_| {
                Error::InvalidConfiguration(format!(
                    "invalid count '{}' for period '{}'",
                    pair[1], pair[0]
                ))
            })?;
            policy.add(period, count);
        }
        Ok(policy)
    }

    /// The flat options list, symmetric with [`Self::from_config`]
    pub fn to_config(&self) -> Vec<String> {
        self.periods
            .iter()
            .flat_map(|(period, count)| [period.to_string(), count.to_string()])
            .collect()
    }

    /// Add `count` timepoints of the given period, walking backwards from
    /// the reference instant
    ///
    /// Identical timepoints across periods (a year boundary is also a month
    /// boundary) are deduplicated.
    pub fn add(&mut self, period: Period, count: u32) {
        let day = self.reference.date_naive();
        match period {
            Period::Year => {
                let mut boundary = start_of_year(day);
                for _ in 0..count {
                    self.timeline.insert(midnight(boundary));
                    boundary = sub_months(boundary, 12);
                }
            }
            Period::Month => {
                let mut boundary = start_of_month(day);
                for _ in 0..count {
                    self.timeline.insert(midnight(boundary));
                    boundary = sub_months(boundary, 1);
                }
            }
            Period::Week => {
                let mut boundary = start_of_week(day);
                for _ in 0..count {
                    self.timeline.insert(midnight(boundary));
                    boundary = boundary - Days::new(7);
                }
            }
            Period::Day => {
                let mut boundary = day;
                for _ in 0..count {
                    self.timeline.insert(midnight(boundary));
                    boundary = boundary - Days::new(1);
                }
            }
            Period::Hour => {
                let mut boundary =
                    midnight(day) + Duration::hours(i64::from(self.reference.hour()));
                for _ in 0..count {
                    self.timeline.insert(boundary);
                    boundary -= Duration::hours(1);
                }
            }
        }
        self.periods.push((period, count));
    }

    /// The derived timepoints, deduplicated and sorted
    pub fn timepoints(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.timeline
    }

    /// Compute the keep set
    ///
    /// Starts from the default-filtered candidates (foreign synchronization
    /// points removed, only the newest own one retained), keeps everything
    /// tagged important, assigns to each timepoint the earliest record at or
    /// after it, and finally keeps every record newer than the newest kept
    /// one as a guard against the race window between policy evaluation and
    /// deletion.
    pub fn filter(&self, target_uuid: &str, candidates: &[SnapshotRecord]) -> BTreeSet<u64> {
        let base_nums = default_filter(target_uuid, candidates);
        let mut base: Vec<&SnapshotRecord> = candidates
            .iter()
            .filter(|s| base_nums.contains(&s.num()))
            .collect();
        base.sort_by_key(|s| (s.date(), s.num()));

        let mut keep = BTreeSet::new();
        if let Some(anchor) = newest_sync_point(target_uuid, candidates) {
            keep.insert(anchor.num());
        }
        for snapshot in &base {
            if snapshot.is_important() {
                keep.insert(snapshot.num());
            }
        }

        // Merge records and timepoints by time; each timepoint claims the
        // earliest record at or after it. A record may satisfy several
        // timepoints.
        let mut idx = 0;
        for timepoint in &self.timeline {
            while idx < base.len() && base[idx].date() < *timepoint {
                idx += 1;
            }
            match base.get(idx) {
                Some(snapshot) => {
                    tracing::debug!(
                        "timeline: snapshot {} covers timepoint {}",
                        snapshot.num(),
                        timepoint
                    );
                    keep.insert(snapshot.num());
                }
                None => break,
            }
        }

        // Safety net: everything newer than the first kept record, scanning
        // newest to oldest, is kept too
        let mut by_num: Vec<&SnapshotRecord> = base.clone();
        by_num.sort_by_key(|s| s.num());
        for snapshot in by_num.iter().rev() {
            if keep.contains(&snapshot.num()) {
                break;
            }
            keep.insert(snapshot.num());
        }

        keep
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight is a valid time"))
}

fn start_of_year(day: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(day.year(), 1, 1).expect("January 1st is a valid date")
}

fn start_of_month(day: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(day.year(), day.month(), 1).expect("the 1st is a valid date")
}

fn start_of_week(day: NaiveDate) -> NaiveDate {
    day - Days::new(u64::from(day.weekday().num_days_from_sunday()) + 1)
}

fn sub_months(day: NaiveDate, months: u32) -> NaiveDate {
    day.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}
