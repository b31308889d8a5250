// src/reminders/store.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ReminderCandidate, ReminderCandidateRow};
use crate::reminders::error::StoreError;
use crate::reminders::window::CandidateQuery;

/// Persistence seam for the reminder pipeline.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Appointments inside the query window with a remindable status.
    async fn find_reminder_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<ReminderCandidate>, StoreError>;

    /// Sets `reminder_sent = true`. Applying it twice is harmless.
    async fn mark_reminder_sent(&self, appointment_id: Uuid) -> Result<(), StoreError>;
}

pub struct PgAppointmentStore {
    db: PgPool,
}

impl PgAppointmentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn find_reminder_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        let statuses: Vec<String> = query
            .status_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        // date + time yields a local timestamp, so a window that crosses
        // midnight still finds early appointments on the next day.
        let rows: Vec<ReminderCandidateRow> = sqlx::query_as::<_, ReminderCandidateRow>(
            r#"
            SELECT
              a.appointment_id,
              a.date,
              a.time,
              a.status,
              a.reminder_sent,

              pu.email      AS patient_email,
              pu.first_name AS patient_first,
              pu.last_name  AS patient_last,

              du.first_name AS doctor_first,
              du.last_name  AS doctor_last,

              s.name AS service_name

            FROM appointment a
            JOIN patient p      ON p.patient_id = a.patient_id
            JOIN clinic_user pu ON pu.user_id = p.user_id
            JOIN doctor d       ON d.doctor_id = a.doctor_id
            JOIN clinic_user du ON du.user_id = d.user_id
            JOIN service s      ON s.service_id = a.service_id

            WHERE (a.date + a.time) BETWEEN $1 AND $2
              AND a.status = ANY($3)
              AND (NOT $4::bool OR a.reminder_sent = false)

            ORDER BY a.date ASC, a.time ASC
            "#,
        )
        .bind(query.window.start)
        .bind(query.window.end)
        .bind(&statuses)
        .bind(query.only_unsent)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ReminderCandidate::try_from).collect()
    }

    async fn mark_reminder_sent(&self, appointment_id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE appointment
            SET reminder_sent = true
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment_id)
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(appointment_id));
        }
        Ok(())
    }
}
