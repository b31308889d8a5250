//! In-memory fakes shared by the reminder tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::models::{AppointmentStatus, ReminderCandidate};
use crate::reminders::error::{NotificationError, StoreError};
use crate::reminders::notifier::NotificationSender;
use crate::reminders::store::AppointmentStore;
use crate::reminders::window::CandidateQuery;

/// 2024-06-01 10:00, the reference "now" of most tests.
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

pub fn candidate(time: &str) -> ReminderCandidate {
    appointment_at(time, AppointmentStatus::Scheduled, false)
}

pub fn appointment_at(time: &str, status: AppointmentStatus, reminder_sent: bool) -> ReminderCandidate {
    ReminderCandidate {
        appointment_id: Uuid::new_v4(),
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
        status,
        reminder_sent,
        patient_email: "amal@example.com".into(),
        patient_name: "Amal Haddad".into(),
        doctor_name: "Dr. Rania Saleh".into(),
        service_name: "Fertility consultation".into(),
    }
}

#[derive(Default)]
pub struct MemoryAppointmentStore {
    rows: Mutex<Vec<ReminderCandidate>>,
    fail_queries: AtomicBool,
    panic_on_query: AtomicBool,
    fail_marks: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
    query_calls: AtomicUsize,
    mark_calls: AtomicUsize,
}

impl MemoryAppointmentStore {
    pub fn with(rows: Vec<ReminderCandidate>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn fail_queries(&self, on: bool) {
        self.fail_queries.store(on, Ordering::SeqCst);
    }

    pub fn panic_on_query(&self, on: bool) {
        self.panic_on_query.store(on, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_marks(&self, on: bool) {
        self.fail_marks.store(on, Ordering::SeqCst);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }

    pub fn reminder_sent(&self, id: Uuid) -> bool {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.appointment_id == id)
            .map(|r| r.reminder_sent)
            .unwrap_or(false)
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn find_reminder_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_query.load(Ordering::SeqCst) {
            panic!("store exploded");
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| query.matches(r.date, r.time, r.status, r.reminder_sent))
            .cloned()
            .collect())
    }

    async fn mark_reminder_sent(&self, appointment_id: Uuid) -> Result<(), StoreError> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.appointment_id == appointment_id)
            .ok_or(StoreError::NotFound(appointment_id))?;
        row.reminder_sent = true;
        Ok(())
    }
}

/// Records every reminder it is asked to send; fails for chosen appointments.
#[derive(Default)]
pub struct ScriptedSender {
    sent: Mutex<Vec<Uuid>>,
    failing: HashSet<Uuid>,
}

impl ScriptedSender {
    pub fn failing_for(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            failing: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn sent_to(&self) -> Vec<Uuid> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send_reminder(&self, appointment: &ReminderCandidate) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(appointment.appointment_id);
        if self.failing.contains(&appointment.appointment_id) {
            return Err(NotificationError::Transport("smtp connection refused".into()));
        }
        Ok(())
    }
}
