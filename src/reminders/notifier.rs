// src/reminders/notifier.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::ReminderCandidate;
use crate::reminders::error::NotificationError;

/// Delivers one appointment reminder. `Ok(())` means the message was accepted.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_reminder(&self, appointment: &ReminderCandidate) -> Result<(), NotificationError>;
}

/// Outbound mail channel.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl ReminderEmail {
    pub fn render(appointment: &ReminderCandidate, clinic_name: &str) -> Self {
        let date = appointment.date.format("%B %d, %Y").to_string();
        let time = appointment.time.format("%I:%M %p").to_string();

        let subject = format!("Appointment Reminder - {date} at {time}");

        let text = format!(
            "Dear {patient},\n\n\
             This is a friendly reminder that you have an appointment in 1 hour.\n\n\
             Date: {date}\n\
             Time: {time}\n\
             Doctor: {doctor}\n\
             Service: {service}\n\n\
             Please arrive 15 minutes early for check-in. If you need to reschedule or \
             cancel, contact us as soon as possible.\n\n\
             {clinic}\n",
            patient = appointment.patient_name,
            doctor = appointment.doctor_name,
            service = appointment.service_name,
            clinic = clinic_name,
        );

        let html = format!(
            "<p>Dear {patient},</p>\
             <p>This is a friendly reminder that you have an appointment in 1 hour.</p>\
             <table>\
             <tr><td>Date:</td><td>{date}</td></tr>\
             <tr><td>Time:</td><td>{time}</td></tr>\
             <tr><td>Doctor:</td><td>{doctor}</td></tr>\
             <tr><td>Service:</td><td>{service}</td></tr>\
             </table>\
             <p>Please arrive 15 minutes early for check-in.</p>\
             <p>{clinic}</p>",
            patient = escape_html(&appointment.patient_name),
            doctor = escape_html(&appointment.doctor_name),
            service = escape_html(&appointment.service_name),
            clinic = escape_html(clinic_name),
        );

        Self { subject, html, text }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the reminder email and hands it to a [`MailTransport`].
pub struct EmailReminderSender {
    transport: Arc<dyn MailTransport>,
    clinic_name: String,
}

impl EmailReminderSender {
    pub fn new(transport: Arc<dyn MailTransport>, clinic_name: impl Into<String>) -> Self {
        Self {
            transport,
            clinic_name: clinic_name.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for EmailReminderSender {
    async fn send_reminder(&self, appointment: &ReminderCandidate) -> Result<(), NotificationError> {
        let recipient = appointment.patient_email.trim();
        if recipient.is_empty() {
            return Err(NotificationError::MissingRecipient(appointment.appointment_id));
        }

        let email = ReminderEmail::render(appointment, &self.clinic_name);
        tracing::info!(
            appointment_id = %appointment.appointment_id,
            recipient,
            "Sending appointment reminder"
        );
        self.transport
            .send(recipient, &email.subject, &email.html, &email.text)
            .await
    }
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport {
    from: String,
}

impl LogTransport {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        _html_body: &str,
        text_body: &str,
    ) -> Result<(), NotificationError> {
        tracing::info!(from = %self.from, to = recipient, subject, "\n{text_body}");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct RelayTransport {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: String,
}

const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

impl RelayTransport {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        from: impl Into<String>,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailTransport for RelayTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), NotificationError> {
        let mut req = self.client.post(&self.url).json(&RelayMessage {
            from: &self.from,
            to: recipient,
            subject,
            html: html_body,
            text: text_body,
        });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
