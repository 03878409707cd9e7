use crate::{
    Command, CoreError,
    domain::{Page, ProjectScope, require_non_empty},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_SESSION_PAGE: i64 = 100;

/// A play interval. Open while `end_at` is `None`; `duration` is in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub project_id: Uuid,
    pub device_id: Uuid,
    pub begin_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn open(project_id: Uuid, device_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            device_id,
            begin_at: now,
            end_at: None,
            duration: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }

    /// Closes (or re-closes) the session at `now`. The duration is always
    /// recomputed from the original `begin_at`, and a clock that reads earlier
    /// than `begin_at` closes the session with zero length.
    pub fn close(&mut self, now: DateTime<Utc>) {
        let end_at = now.max(self.begin_at);
        let nanos = (end_at - self.begin_at)
            .num_nanoseconds()
            .unwrap_or(i64::MAX);
        self.end_at = Some(end_at);
        self.duration = Some(nanos);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone)]
pub struct BeginSession {
    pub project_id: Uuid,
    pub identifier: String,
}

#[derive(Debug, Clone)]
pub struct EndSession {
    pub project_id: Uuid,
    pub session_id: Uuid,
    /// When given, must name the device the session was opened for.
    pub identifier: Option<String>,
}

impl Command for BeginSession {}
impl Command for EndSession {}

impl BeginSession {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_non_empty("identifier", &self.identifier)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub scope: ProjectScope,
    pub device_id: Option<Uuid>,
    /// Bounds on `begin_at`, inclusive.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn close_computes_duration_in_nanoseconds() {
        let begin = Utc::now();
        let mut session = Session::open(Uuid::new_v4(), Uuid::new_v4(), begin);
        assert!(session.is_open());

        session.close(begin + TimeDelta::seconds(5));
        assert!(!session.is_open());
        assert_eq!(session.duration, Some(5_000_000_000));
        assert_eq!(session.end_at, Some(begin + TimeDelta::seconds(5)));
    }

    #[test]
    fn re_closing_recomputes_from_begin() {
        let begin = Utc::now();
        let mut session = Session::open(Uuid::new_v4(), Uuid::new_v4(), begin);
        session.close(begin + TimeDelta::seconds(2));
        session.close(begin + TimeDelta::seconds(9));
        assert_eq!(session.duration, Some(9_000_000_000));
    }

    #[test]
    fn clock_behind_begin_yields_zero_length() {
        let begin = Utc::now();
        let mut session = Session::open(Uuid::new_v4(), Uuid::new_v4(), begin);
        session.close(begin - TimeDelta::milliseconds(250));
        assert_eq!(session.end_at, Some(begin));
        assert_eq!(session.duration, Some(0));
    }
}
