// src/startup.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio::task::JoinHandle;

use crate::reminders::{DispatchOptions, ReminderScheduler};

/// Delay before the scheduler's first pass, so the server is listening first.
pub const AUTOSTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    SendReminders(DispatchOptions),
    HashPassword(String),
}

impl Command {
    /// Parses the arguments after the program name.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();

        match args.first().map(String::as_str) {
            None | Some("serve") => Ok(Command::Serve),
            Some("send-reminders") => {
                let mut opts = DispatchOptions::default();
                for flag in &args[1..] {
                    match flag.as_str() {
                        "--dry-run" => opts.dry_run = true,
                        "--force" => opts.force_resend = true,
                        other => bail!("unknown flag for send-reminders: {other}"),
                    }
                }
                Ok(Command::SendReminders(opts))
            }
            Some("hash-password") => match args.get(1) {
                Some(pw) => Ok(Command::HashPassword(pw.clone())),
                None => bail!("Usage: hash-password <password>"),
            },
            Some(other) => bail!("unknown command: {other}"),
        }
    }
}

/// Whether this process should run the background reminder loop.
/// `ENABLE_REMINDERS` wins when set; otherwise only the server runs it.
pub fn should_autostart(command: &Command, enable_override: Option<bool>) -> bool {
    match command {
        Command::Serve => enable_override.unwrap_or(true),
        Command::SendReminders(_) | Command::HashPassword(_) => false,
    }
}

/// Starts the scheduler shortly after boot without blocking the caller.
/// Safe to call more than once: an already running scheduler is left alone.
/// The returned task yields `true` when this call is the one that started the loop.
pub fn spawn_autostart(scheduler: Arc<ReminderScheduler>, delay: Duration) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let started = scheduler.try_start(None).await.is_some();
        if started {
            tracing::info!("Automatic reminder scheduler started");
        }
        started
    })
}
