mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod reminders;
mod routes;
mod startup;

use std::sync::Arc;

use crate::{
    config::Config,
    models::AppState,
    reminders::{
        EmailReminderSender, LogTransport, MailTransport, PgAppointmentStore, RelayTransport,
        ReminderDispatcher, ReminderScheduler, SchedulerConfig,
    },
    startup::Command,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let command = Command::parse(std::env::args().skip(1))?;

    if let Command::HashPassword(password) = &command {
        let phc = auth::hash_password(password).map_err(anyhow::Error::msg)?;
        println!("{phc}");
        return Ok(());
    }

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;
    let scheduler = Arc::new(build_scheduler(&cfg, pool.clone())?);

    match command {
        Command::SendReminders(opts) => {
            let summary = scheduler.dispatcher().dispatch(opts).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.dry_run {
                println!("This was a dry run. No emails were actually sent.");
            }
            Ok(())
        }
        Command::Serve => serve(cfg, pool, scheduler).await,
        Command::HashPassword(_) => Ok(()),
    }
}

fn build_scheduler(cfg: &Config, pool: sqlx::PgPool) -> anyhow::Result<ReminderScheduler> {
    let transport: Arc<dyn MailTransport> = match &cfg.mail.relay_url {
        Some(url) => Arc::new(RelayTransport::new(
            url.clone(),
            cfg.mail.relay_token.clone(),
            cfg.mail.from.clone(),
        )?),
        None => {
            tracing::warn!("MAIL_RELAY_URL not set; reminders will only be logged");
            Arc::new(LogTransport::new(cfg.mail.from.clone()))
        }
    };

    let sender = Arc::new(EmailReminderSender::new(transport, cfg.clinic_name.clone()));
    let store = Arc::new(PgAppointmentStore::new(pool));
    let dispatcher = Arc::new(ReminderDispatcher::new(store, sender));

    Ok(ReminderScheduler::new(
        dispatcher,
        SchedulerConfig {
            interval: cfg.reminder_interval,
            pass_timeout: cfg.reminder_pass_timeout,
            ..Default::default()
        },
    ))
}

async fn serve(
    cfg: Config,
    pool: sqlx::PgPool,
    scheduler: Arc<ReminderScheduler>,
) -> anyhow::Result<()> {
    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        clinic_name: cfg.clinic_name.clone(),
        reminders: Arc::clone(&scheduler),
    };

    // Browser clients (booking site, staff dashboard) call the API cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    if startup::should_autostart(&Command::Serve, cfg.enable_reminders) {
        startup::spawn_autostart(Arc::clone(&scheduler), startup::AUTOSTART_DELAY);
    } else {
        tracing::info!("Reminder scheduler disabled by ENABLE_REMINDERS");
    }

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
