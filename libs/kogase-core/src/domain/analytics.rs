use crate::{AnalyticsRepository, CoreError, domain::ProjectScope};
use chrono::{DateTime, Datelike, Months, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Day offsets after a cohort window at which retention is sampled.
pub const RETENTION_DAYS: [i64; 4] = [1, 7, 14, 30];

/// Upper bound on the span, in days, of a single series or retention request.
pub const MAX_SERIES_DAYS: i64 = 400;

/// The requested range plus the instant the request is evaluated at. DAU and
/// MAU are anchored to `now`; the range additionally filters every figure.
#[derive(Debug, Clone, Copy)]
pub struct SummaryWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl SummaryWindow {
    pub fn dau_since(&self) -> DateTime<Utc> {
        self.now - TimeDelta::hours(24)
    }

    pub fn mau_since(&self) -> DateTime<Utc> {
        self.now - TimeDelta::days(30)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub dau: i64,
    pub mau: i64,
    /// Nanoseconds across closed sessions.
    pub total_duration: i64,
    pub total_installs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for CohortPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CoreError::Validation(format!(
                "Unknown cohort period '{other}', expected daily, weekly or monthly"
            ))),
        }
    }
}

impl CohortPeriod {
    /// Start of the window containing `at`: midnight UTC, snapped back to
    /// Monday for weekly and to the first of the month for monthly.
    pub fn align(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = start_of_day(at);
        match self {
            Self::Daily => midnight,
            Self::Weekly => {
                midnight - TimeDelta::days(i64::from(midnight.weekday().num_days_from_monday()))
            }
            Self::Monthly => start_of_month(midnight),
        }
    }

    pub fn advance(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily => start.checked_add_signed(TimeDelta::days(1)),
            Self::Weekly => start.checked_add_signed(TimeDelta::days(7)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
        }
    }
}

pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub fn start_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    let day = start_of_day(at);
    day - TimeDelta::days(i64::from(day.day0()))
}

/// Complete cohort windows between `from` and `to`. A window that would end
/// after `to` is not emitted.
pub fn cohort_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    period: CohortPeriod,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = period.align(from);
    while cursor < to {
        let Some(next) = period.advance(cursor) else {
            break;
        };
        if next > to {
            break;
        }
        windows.push((cursor, next));
        cursor = next;
    }
    windows
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPoint {
    pub day: i64,
    pub users: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRetention {
    pub cohort_date: String,
    pub new_users: i64,
    pub retention: Vec<RetentionPoint>,
}

fn percentage(users: i64, cohort_size: i64) -> f64 {
    if cohort_size == 0 {
        0.0
    } else {
        users as f64 / cohort_size as f64 * 100.0
    }
}

/// Groups devices by the window their `first_seen` falls in and samples how
/// many of each cohort were active in `[window_end, window_end + n days)`.
pub async fn cohort_retention(
    repo: &dyn AnalyticsRepository,
    scope: &ProjectScope,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    period: CohortPeriod,
) -> Result<Vec<CohortRetention>, CoreError> {
    if from > to {
        return Err(CoreError::Validation("from must not be after to".into()));
    }
    if (to - from).num_days() > MAX_SERIES_DAYS {
        return Err(CoreError::Validation(format!(
            "Range may span at most {MAX_SERIES_DAYS} days"
        )));
    }

    let mut cohorts = Vec::new();
    for (start, end) in cohort_windows(from, to, period) {
        let members = repo.devices_first_seen_between(scope, start, end).await?;
        if members.is_empty() {
            continue;
        }
        let new_users = members.len() as i64;

        let mut retention = Vec::with_capacity(RETENTION_DAYS.len() + 1);
        retention.push(RetentionPoint {
            day: 0,
            users: new_users,
            percentage: 100.0,
        });
        for day in RETENTION_DAYS {
            let users = repo
                .count_active_devices(scope, Some(members.as_slice()), None, end, end + TimeDelta::days(day))
                .await?;
            retention.push(RetentionPoint {
                day,
                users,
                percentage: percentage(users, new_users),
            });
        }

        cohorts.push(CohortRetention {
            cohort_date: start.format("%Y-%m-%d").to_string(),
            new_users,
            retention,
        });
    }
    Ok(cohorts)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyActivity {
    pub month: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentActivity {
    pub dau: i64,
    pub mau: i64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUsers {
    pub daily_active_users: Vec<DailyActivity>,
    pub monthly_active_users: Vec<MonthlyActivity>,
    pub current: CurrentActivity,
}

/// Distinct devices with events per UTC day and per calendar month of the
/// range, plus the current day (last 24 hours) and month-to-date figures.
pub async fn active_users(
    repo: &dyn AnalyticsRepository,
    scope: &ProjectScope,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    platform: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ActiveUsers, CoreError> {
    if from > to {
        return Err(CoreError::Validation("from must not be after to".into()));
    }
    if (to - from).num_days() > MAX_SERIES_DAYS {
        return Err(CoreError::Validation(format!(
            "Range may span at most {MAX_SERIES_DAYS} days"
        )));
    }

    let mut daily = Vec::new();
    let mut day = start_of_day(from);
    while day <= to {
        let next = day + TimeDelta::days(1);
        let count = repo
            .count_active_devices(scope, None, platform, day, next)
            .await?;
        daily.push(DailyActivity {
            date: day.format("%Y-%m-%d").to_string(),
            count,
        });
        day = next;
    }

    let mut monthly = Vec::new();
    let mut month = start_of_month(from);
    while month <= to {
        let Some(next) = month.checked_add_months(Months::new(1)) else {
            break;
        };
        let count = repo
            .count_active_devices(scope, None, platform, month, next)
            .await?;
        monthly.push(MonthlyActivity {
            month: month.format("%Y-%m").to_string(),
            count,
        });
        month = next;
    }

    let dau = repo
        .count_active_devices(scope, None, platform, now - TimeDelta::hours(24), now)
        .await?;
    let mau = repo
        .count_active_devices(scope, None, platform, start_of_month(now), now + TimeDelta::days(1))
        .await?;
    let ratio = if mau == 0 { 0.0 } else { dau as f64 / mau as f64 };

    Ok(ActiveUsers {
        daily_active_users: daily,
        monthly_active_users: monthly,
        current: CurrentActivity { dau, mau, ratio },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn weekly_alignment_snaps_to_monday_midnight() {
        // 2025-03-13 is a Thursday
        assert_eq!(CohortPeriod::Weekly.align(at(2025, 3, 13, 15)), at(2025, 3, 10, 0));
        assert_eq!(CohortPeriod::Weekly.align(at(2025, 3, 10, 0)), at(2025, 3, 10, 0));
    }

    #[test]
    fn monthly_alignment_snaps_to_first() {
        assert_eq!(CohortPeriod::Monthly.align(at(2025, 2, 27, 23)), at(2025, 2, 1, 0));
        assert_eq!(CohortPeriod::Monthly.advance(at(2025, 1, 1, 0)), Some(at(2025, 2, 1, 0)));
    }

    #[test]
    fn partial_trailing_window_is_dropped() {
        let windows = cohort_windows(at(2025, 3, 10, 9), at(2025, 3, 26, 0), CohortPeriod::Weekly);
        assert_eq!(
            windows,
            vec![
                (at(2025, 3, 10, 0), at(2025, 3, 17, 0)),
                (at(2025, 3, 17, 0), at(2025, 3, 24, 0)),
            ]
        );
    }

    #[test]
    fn period_parsing() {
        assert_eq!("Weekly".parse::<CohortPeriod>().unwrap(), CohortPeriod::Weekly);
        assert!(matches!(
            "yearly".parse::<CohortPeriod>(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn window_range_membership() {
        let now = at(2025, 3, 10, 12);
        let window = SummaryWindow {
            from: Some(at(2025, 3, 1, 0)),
            to: None,
            now,
        };
        assert!(window.contains(at(2025, 3, 2, 0)));
        assert!(!window.contains(at(2025, 2, 28, 0)));
        assert_eq!(window.dau_since(), at(2025, 3, 9, 12));
        assert_eq!(window.mau_since(), at(2025, 2, 8, 12));
    }

    #[tokio::test]
    async fn retention_range_is_bounded() {
        let store = crate::adapters::InMemoryStore::new();
        let scope = ProjectScope::owned_by(uuid::Uuid::new_v4());

        let result = cohort_retention(
            &store,
            &scope,
            at(1970, 1, 1, 0),
            at(2025, 3, 10, 0),
            CohortPeriod::Daily,
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let in_range = cohort_retention(
            &store,
            &scope,
            at(2025, 1, 1, 0),
            at(2025, 3, 10, 0),
            CohortPeriod::Daily,
        )
        .await
        .unwrap();
        assert!(in_range.is_empty());
    }

    #[test]
    fn percentages_scale_to_hundred() {
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(0, 0), 0.0);
    }
}
