use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reminders::{ReminderScheduler, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub clinic_name: String,
    pub reminders: Arc<ReminderScheduler>,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Accounts log in with their email address; there is no separate username.
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub user_type: String,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: i16,
    pub is_active: bool,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            email: self.email.clone(),
            display_name: display_name(self.role, &self.first_name, &self.last_name),
            user_type: role_to_string(self.role),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// Joined appointment/patient/doctor/service row as the reminder query returns it.
#[derive(Debug, sqlx::FromRow)]
pub struct ReminderCandidateRow {
    pub appointment_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: String,
    pub reminder_sent: bool,
    pub patient_email: String,
    pub patient_first: String,
    pub patient_last: String,
    pub doctor_first: String,
    pub doctor_last: String,
    pub service_name: String,
}

/// The subset of an appointment the reminder pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderCandidate {
    pub appointment_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub reminder_sent: bool,
    pub patient_email: String,
    pub patient_name: String,
    pub doctor_name: String,
    pub service_name: String,
}

impl TryFrom<ReminderCandidateRow> for ReminderCandidate {
    type Error = StoreError;

    fn try_from(r: ReminderCandidateRow) -> Result<Self, Self::Error> {
        let status = r
            .status
            .parse::<AppointmentStatus>()
            .map_err(|_| StoreError::UnknownStatus {
                appointment_id: r.appointment_id,
                status: r.status.clone(),
            })?;

        Ok(ReminderCandidate {
            appointment_id: r.appointment_id,
            date: r.date,
            time: r.time,
            status,
            reminder_sent: r.reminder_sent,
            patient_email: r.patient_email,
            patient_name: display_name(ROLE_PATIENT, &r.patient_first, &r.patient_last),
            doctor_name: display_name(ROLE_DOCTOR, &r.doctor_first, &r.doctor_last),
            service_name: r.service_name,
        })
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// clinic_user.role values.
pub const ROLE_PATIENT: i16 = 0;
pub const ROLE_DOCTOR: i16 = 1;
pub const ROLE_STAFF: i16 = 2;

pub fn role_to_string(role: i16) -> String {
    match role {
        ROLE_PATIENT => "patient",
        ROLE_DOCTOR => "doctor",
        ROLE_STAFF => "staff",
        _ => "user",
    }
    .to_string()
}

/// Doctors are always addressed with their title.
pub fn display_name(role: i16, first: &str, last: &str) -> String {
    if role == ROLE_DOCTOR {
        format!("Dr. {first} {last}")
    } else {
        format!("{first} {last}")
    }
}
