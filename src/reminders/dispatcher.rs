//! One reminder pass: find appointments about an hour away, send each patient
//! a reminder, and flag the appointment so later passes skip it.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::ReminderCandidate;
use crate::reminders::error::DispatchError;
use crate::reminders::notifier::NotificationSender;
use crate::reminders::store::AppointmentStore;
use crate::reminders::window::{CandidateQuery, ReminderWindow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DispatchOptions {
    /// Ignore `reminder_sent` and remind again.
    #[serde(default, alias = "force")]
    pub force_resend: bool,
    /// Report candidates without sending or writing anything.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub appointment_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub dry_run: bool,
    pub matched: usize,
    /// On a dry run this counts the reminders that would have been sent.
    pub sent: usize,
    pub failed: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchSummary {
    fn empty(window: &ReminderWindow, dry_run: bool) -> Self {
        Self {
            window_start: window.start,
            window_end: window.end,
            dry_run,
            matched: 0,
            sent: 0,
            failed: 0,
            failures: vec![],
        }
    }
}

enum Delivery {
    Sent,
    WouldSend,
    Failed(String),
}

pub struct ReminderDispatcher {
    store: Arc<dyn AppointmentStore>,
    sender: Arc<dyn NotificationSender>,
}

impl ReminderDispatcher {
    pub fn new(store: Arc<dyn AppointmentStore>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { store, sender }
    }

    /// Runs a pass against the server's local wall clock.
    pub async fn dispatch(&self, opts: DispatchOptions) -> Result<DispatchSummary, DispatchError> {
        self.dispatch_at(Local::now().naive_local(), opts).await
    }

    pub async fn dispatch_at(
        &self,
        now: NaiveDateTime,
        opts: DispatchOptions,
    ) -> Result<DispatchSummary, DispatchError> {
        let window = ReminderWindow::around(now);
        if window.spans_midnight() {
            debug!(
                window_start = %window.start,
                window_end = %window.end,
                "Reminder window crosses midnight"
            );
        }

        info!(
            date = %window.start_date(),
            from = %window.start_time().format("%H:%M"),
            to = %window.end_time().format("%H:%M"),
            force_resend = opts.force_resend,
            dry_run = opts.dry_run,
            "Looking for appointments that need reminders"
        );

        let query = CandidateQuery::new(window, opts.force_resend);
        let candidates: Vec<ReminderCandidate> = self
            .store
            .find_reminder_candidates(&query)
            .await?
            .into_iter()
            .filter(|c| {
                let keep = query.matches(c.date, c.time, c.status, c.reminder_sent);
                if !keep {
                    warn!(appointment_id = %c.appointment_id, "Store returned an appointment outside the reminder filter");
                }
                keep
            })
            .collect();

        let mut summary = DispatchSummary::empty(&window, opts.dry_run);
        summary.matched = candidates.len();

        if candidates.is_empty() {
            debug!("No appointments found that need reminders");
            return Ok(summary);
        }

        for appointment in &candidates {
            match self.deliver(appointment, opts.dry_run).await {
                Delivery::Sent | Delivery::WouldSend => summary.sent += 1,
                Delivery::Failed(reason) => {
                    summary.failed += 1;
                    summary.failures.push(DeliveryFailure {
                        appointment_id: appointment.appointment_id,
                        reason,
                    });
                }
            }
        }

        info!(
            matched = summary.matched,
            sent = summary.sent,
            failed = summary.failed,
            dry_run = summary.dry_run,
            "Reminder check completed"
        );
        Ok(summary)
    }

    async fn deliver(&self, appointment: &ReminderCandidate, dry_run: bool) -> Delivery {
        let id = appointment.appointment_id;
        let at = appointment.date.and_time(appointment.time);

        if dry_run {
            info!(
                appointment_id = %id,
                patient = %appointment.patient_name,
                doctor = %appointment.doctor_name,
                at = %at.format("%Y-%m-%d %H:%M"),
                status = %appointment.status,
                already_sent = appointment.reminder_sent,
                "[dry run] would send reminder"
            );
            return Delivery::WouldSend;
        }

        if let Err(e) = self.sender.send_reminder(appointment).await {
            error!(appointment_id = %id, error = %e, "Failed to send appointment reminder");
            return Delivery::Failed(e.to_string());
        }

        // The message is out; if the flag write fails the next pass sends again.
        if let Err(e) = self.store.mark_reminder_sent(id).await {
            warn!(
                appointment_id = %id,
                error = %e,
                "Reminder sent but reminder_sent flag was not persisted"
            );
            return Delivery::Failed(format!("flag not persisted: {e}"));
        }

        info!(appointment_id = %id, "Reminder sent");
        Delivery::Sent
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::AppointmentStatus;
    use crate::reminders::testing::{appointment_at, now, MemoryAppointmentStore, ScriptedSender};

    fn dispatcher(
        store: &Arc<MemoryAppointmentStore>,
        sender: &Arc<ScriptedSender>,
    ) -> ReminderDispatcher {
        ReminderDispatcher::new(store.clone(), sender.clone())
    }

    #[tokio::test]
    async fn selects_only_appointments_inside_the_window() {
        let in_window = appointment_at("11:00", AppointmentStatus::Scheduled, false);
        let too_soon = appointment_at("10:40", AppointmentStatus::Scheduled, false);
        let too_late = appointment_at("11:10", AppointmentStatus::Scheduled, false);
        let cancelled = appointment_at("11:00", AppointmentStatus::Cancelled, false);
        let already = appointment_at("11:00", AppointmentStatus::Confirmed, true);

        let store = Arc::new(MemoryAppointmentStore::with(vec![
            in_window.clone(),
            too_soon,
            too_late,
            cancelled,
            already.clone(),
        ]));
        let sender = Arc::new(ScriptedSender::default());

        let summary = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(sender.sent_to(), vec![in_window.appointment_id]);

        let forced = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions { force_resend: true, dry_run: false })
            .await
            .unwrap();

        // the first pass flagged in_window, so both flagged rows come back
        assert_eq!(forced.matched, 2);
        assert!(sender.sent_to().contains(&already.appointment_id));
    }

    #[tokio::test]
    async fn concrete_morning_pass() {
        let a = appointment_at("11:00", AppointmentStatus::Confirmed, false);
        let b = appointment_at("09:30", AppointmentStatus::Scheduled, false);
        let store = Arc::new(MemoryAppointmentStore::with(vec![a.clone(), b.clone()]));
        let sender = Arc::new(ScriptedSender::default());

        let summary = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.window_start.format("%H:%M").to_string(), "10:55");
        assert_eq!(summary.window_end.format("%H:%M").to_string(), "11:05");
        assert_eq!((summary.matched, summary.sent, summary.failed), (1, 1, 0));
        assert!(store.reminder_sent(a.appointment_id));
        assert!(!store.reminder_sent(b.appointment_id));
    }

    #[tokio::test]
    async fn dry_run_sends_nothing_and_writes_nothing() {
        let a = appointment_at("10:58", AppointmentStatus::Scheduled, false);
        let b = appointment_at("11:04", AppointmentStatus::Confirmed, false);
        let store = Arc::new(MemoryAppointmentStore::with(vec![a.clone(), b.clone()]));
        let sender = Arc::new(ScriptedSender::default());

        let summary = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions { force_resend: false, dry_run: true })
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.sent, 2);
        assert!(sender.sent_to().is_empty());
        assert!(!store.reminder_sent(a.appointment_id));
        assert!(!store.reminder_sent(b.appointment_id));
        assert_eq!(store.mark_calls(), 0);
    }

    #[tokio::test]
    async fn one_failed_send_does_not_stop_the_pass() {
        let first = appointment_at("10:56", AppointmentStatus::Scheduled, false);
        let second = appointment_at("11:00", AppointmentStatus::Scheduled, false);
        let third = appointment_at("11:03", AppointmentStatus::Confirmed, false);
        let store = Arc::new(MemoryAppointmentStore::with(vec![
            first.clone(),
            second.clone(),
            third.clone(),
        ]));
        let sender = Arc::new(ScriptedSender::failing_for([second.appointment_id]));

        let summary = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!((summary.matched, summary.sent, summary.failed), (3, 2, 1));
        assert_eq!(summary.failures[0].appointment_id, second.appointment_id);
        assert!(store.reminder_sent(first.appointment_id));
        assert!(!store.reminder_sent(second.appointment_id));
        assert!(store.reminder_sent(third.appointment_id));

        // the failed one is retried by the next pass, the others are not resent
        let retry = dispatcher(&store, &ScriptedSender::default().into())
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!((retry.matched, retry.sent), (1, 1));
        assert!(store.reminder_sent(second.appointment_id));
    }

    #[tokio::test]
    async fn flag_write_failure_counts_as_failed() {
        let a = appointment_at("11:00", AppointmentStatus::Scheduled, false);
        let store = Arc::new(MemoryAppointmentStore::with(vec![a.clone()]));
        store.fail_marks(true);
        let sender = Arc::new(ScriptedSender::default());

        let summary = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!((summary.sent, summary.failed), (0, 1));
        assert_eq!(sender.sent_to(), vec![a.appointment_id]);
        assert!(!store.reminder_sent(a.appointment_id));
    }

    #[tokio::test]
    async fn flag_never_goes_back_to_false() {
        let a = appointment_at("11:00", AppointmentStatus::Scheduled, true);
        let store = Arc::new(MemoryAppointmentStore::with(vec![a.clone()]));
        let sender = Arc::new(ScriptedSender::failing_for([a.appointment_id]));

        for opts in [
            DispatchOptions::default(),
            DispatchOptions { force_resend: true, dry_run: false },
            DispatchOptions { force_resend: true, dry_run: true },
        ] {
            dispatcher(&store, &sender).dispatch_at(now(), opts).await.unwrap();
            assert!(store.reminder_sent(a.appointment_id));
        }
    }

    #[tokio::test]
    async fn query_failure_aborts_the_pass() {
        let store = Arc::new(MemoryAppointmentStore::default());
        store.fail_queries(true);
        let sender = Arc::new(ScriptedSender::default());

        let err = dispatcher(&store, &sender)
            .dispatch_at(now(), DispatchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Query(_)));
        assert!(sender.sent_to().is_empty());
    }

    #[tokio::test]
    async fn late_evening_pass_reaches_past_midnight() {
        let before = appointment_at("23:58", AppointmentStatus::Scheduled, false);
        let mut after = appointment_at("00:03", AppointmentStatus::Confirmed, false);
        after.date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        // same clock time as `after`, but on the pass's own day
        let same_day = appointment_at("00:03", AppointmentStatus::Scheduled, false);
        let store = Arc::new(MemoryAppointmentStore::with(vec![
            before.clone(),
            after.clone(),
            same_day.clone(),
        ]));
        let sender = Arc::new(ScriptedSender::default());

        let late = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let summary = dispatcher(&store, &sender)
            .dispatch_at(late, DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.matched, 2);
        assert_eq!(summary.sent, 2);
        assert!(store.reminder_sent(before.appointment_id));
        assert!(store.reminder_sent(after.appointment_id));
        assert!(!store.reminder_sent(same_day.appointment_id));
    }

    #[test]
    fn options_accept_short_force_name() {
        let opts: DispatchOptions = serde_json::from_str(r#"{"force": true}"#).unwrap();
        assert!(opts.force_resend);
        assert!(!opts.dry_run);
    }
}
