// src/reminders/window.rs

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::models::AppointmentStatus;

/// Lead time before an appointment at which the window opens.
pub const WINDOW_LEAD_MIN: i64 = 55;
/// Lead time before an appointment at which the window closes.
pub const WINDOW_LEAD_MAX: i64 = 65;

/// Statuses that still get a reminder.
pub const REMINDER_STATUSES: [AppointmentStatus; 2] =
    [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

/// The `[now + 55min, now + 65min]` slice of server-local time an appointment
/// must start in to be reminded during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReminderWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ReminderWindow {
    pub fn around(now: NaiveDateTime) -> Self {
        Self {
            start: now + Duration::minutes(WINDOW_LEAD_MIN),
            end: now + Duration::minutes(WINDOW_LEAD_MAX),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end.time()
    }

    /// True when the window crosses a calendar-day boundary, e.g. a pass at
    /// 23:00 looking for appointments between 23:55 and 00:05 the next day.
    pub fn spans_midnight(&self) -> bool {
        self.start.date() != self.end.date()
    }

    /// Bounds are inclusive on both ends.
    pub fn contains(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let at = date.and_time(time);
        self.start <= at && at <= self.end
    }
}

/// Filter handed to the appointment store for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub window: ReminderWindow,
    pub statuses: Vec<AppointmentStatus>,
    /// `false` when a pass was asked to resend already-reminded appointments.
    pub only_unsent: bool,
}

impl CandidateQuery {
    pub fn new(window: ReminderWindow, force_resend: bool) -> Self {
        Self {
            window,
            statuses: REMINDER_STATUSES.to_vec(),
            only_unsent: !force_resend,
        }
    }

    pub fn status_names(&self) -> Vec<&'static str> {
        self.statuses.iter().map(|s| s.as_str()).collect()
    }

    pub fn matches(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        status: AppointmentStatus,
        reminder_sent: bool,
    ) -> bool {
        self.window.contains(date, time)
            && self.statuses.contains(&status)
            && !(self.only_unsent && reminder_sent)
    }
}
