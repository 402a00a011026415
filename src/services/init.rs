//! Initialization helpers for the application:
//! - database connection + migrations
//! - background worker spawn helpers
//!
//! This module centralizes bits that would otherwise live in `main.rs`.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::config::Config;
use crate::db::PushNotificationRepository;
use crate::error::AppResult;
use crate::services::fanout::FanoutEngine;
use crate::AppState;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Only URLs with a host are rebuilt from their parts, dropping the userinfo
/// (username:password). Anything else (`user:secret@host` parses as a URL with
/// scheme `user`) falls back to removing everything before '@' or returning
/// "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    match url::Url::parse(db_url) {
        Ok(url) if url.has_host() => {
            let scheme = url.scheme();
            let host = url.host_str().unwrap_or("");
            let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let path = url.path();
            format!("{}://{}{}{}", scheme, host, port_part, path)
        }
        _ => {
            if let Some(at_pos) = db_url.rfind('@') {
                let without_creds = &db_url[at_pos + 1..];
                return format!("(redacted){}", without_creds);
            }
            "(redacted)".to_string()
        }
    }
}

/// Open the SQLite pool and run migrations.
///
/// Foreign keys are enforced on every connection; notification records rely
/// on `ON DELETE CASCADE` when a subscription is removed.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Connected to database file: {}", db_file_path.display());

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// One dispatcher cycle: claim scheduled notifications that are due, plus
/// claims abandoned for longer than the claim timeout, and deliver them.
/// Returns how many were claimed.
///
/// Delivery failures are already recorded on the notification; they are only
/// logged here.
pub async fn dispatch_due_scheduled(state: &Arc<AppState>, limit: i64) -> AppResult<usize> {
    let now = Utc::now().naive_utc();
    let stale_before = chrono::Duration::from_std(Duration::from_secs(
        state.config.scheduler.claim_timeout_seconds,
    ))
    .ok()
    .and_then(|timeout| now.checked_sub_signed(timeout))
    .unwrap_or(NaiveDateTime::MIN);
    let due =
        PushNotificationRepository::claim_due_scheduled(&state.db, now, stale_before, limit).await?;
    if due.is_empty() {
        return Ok(0);
    }

    tracing::info!("Dispatching {} scheduled notifications", due.len());
    let claimed = due.len();
    let engine = FanoutEngine::new(state);

    let deliveries = due.into_iter().map(|record| {
        let engine = &engine;
        async move {
            let id = record.id.clone();
            if let Err(e) = engine.deliver_scheduled(record).await {
                tracing::warn!("Scheduled notification {} failed: {}", id, e);
            }
        }
    });
    futures::future::join_all(deliveries).await;

    Ok(claimed)
}

/// Spawn background workers:
/// - scheduled notification dispatcher
///
/// Returns the `JoinHandle`s so callers can await shutdown. Each worker listens
/// for a shutdown notification via a `tokio::sync::broadcast::Sender<()>`.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if !state.config.scheduler.enabled {
        tracing::info!("Scheduled notification dispatcher disabled");
        return handles;
    }

    // Scheduled notification dispatcher
    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let poll_interval = Duration::from_secs(state.config.scheduler.poll_interval_seconds);
            let batch_size = state.config.scheduler.batch_size as i64;

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    tracing::info!("Scheduled dispatcher received shutdown signal");
                    break;
                }

                tracing::debug!("Polling for due scheduled notifications");
                match dispatch_due_scheduled(&state, batch_size).await {
                    // A full batch means more may be due; poll again right away.
                    Ok(n) if n as i64 >= batch_size => continue,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to dispatch scheduled notifications: {:?}", e);
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scheduled dispatcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }));
    }

    handles
}
