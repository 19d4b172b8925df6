//! Alert lifecycle operations: resolve, unresolve, notes, bulk edits.
//!
//! Resolution notifications are fire and forget: channels are snapshotted
//! from the store, then delivery runs on a detached thread so a slow or
//! broken channel never delays the API response. Delivery failures are
//! logged and dropped.

use chrono::Utc;
use log::{error, info, warn};

use crate::pipeline::ApiError;
use crate::storage::{Alert, ChannelType, NotificationChannel, Store};

/// Mark an alert resolved and dispatch resolution notifications.
pub fn resolve_alert(store: &dyn Store, alert_id: u64) -> Result<Alert, ApiError> {
    let mut alert = store
        .get_alert(alert_id)
        .ok_or(ApiError::AlertNotFound(alert_id))?;
    alert.resolved = true;
    alert.resolved_at = Some(Utc::now());
    store.update_alert(alert.clone())?;
    info!("ALERT_RESOLVED alert_id={} title={:?}", alert.id, alert.title);

    dispatch_resolution(store.active_channels(), alert.clone());
    Ok(alert)
}

/// Reopen a resolved alert.
pub fn unresolve_alert(store: &dyn Store, alert_id: u64) -> Result<Alert, ApiError> {
    let mut alert = store
        .get_alert(alert_id)
        .ok_or(ApiError::AlertNotFound(alert_id))?;
    alert.resolved = false;
    alert.resolved_at = None;
    store.update_alert(alert.clone())?;
    info!("ALERT_UNRESOLVED alert_id={} title={:?}", alert.id, alert.title);
    Ok(alert)
}

/// Append a timestamped note. Whitespace-only notes are rejected.
pub fn add_alert_note(store: &dyn Store, alert_id: u64, note: &str) -> Result<Alert, ApiError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(ApiError::BadPayload("note cannot be empty".to_string()));
    }
    let mut alert = store
        .get_alert(alert_id)
        .ok_or(ApiError::AlertNotFound(alert_id))?;
    alert.add_note(note);
    store.update_alert(alert.clone())?;
    info!("ALERT_NOTE_ADDED alert_id={}", alert.id);
    Ok(alert)
}

/// Resolve every listed alert. Unknown ids are skipped; returns the count
/// actually updated.
pub fn bulk_resolve(store: &dyn Store, alert_ids: &[u64]) -> Result<usize, ApiError> {
    require_ids(alert_ids)?;
    let mut updated = 0;
    let now = Utc::now();
    for &id in alert_ids {
        if let Some(mut alert) = store.get_alert(id) {
            alert.resolved = true;
            alert.resolved_at = Some(now);
            store.update_alert(alert)?;
            updated += 1;
        }
    }
    info!("ALERTS_BULK_RESOLVED count={}", updated);
    Ok(updated)
}

/// Reopen every listed alert. Unknown ids are skipped.
pub fn bulk_unresolve(store: &dyn Store, alert_ids: &[u64]) -> Result<usize, ApiError> {
    require_ids(alert_ids)?;
    let mut updated = 0;
    for &id in alert_ids {
        if let Some(mut alert) = store.get_alert(id) {
            alert.resolved = false;
            alert.resolved_at = None;
            store.update_alert(alert)?;
            updated += 1;
        }
    }
    info!("ALERTS_BULK_UNRESOLVED count={}", updated);
    Ok(updated)
}

/// Delete every listed alert. Returns the count actually removed.
pub fn bulk_delete(store: &dyn Store, alert_ids: &[u64]) -> Result<usize, ApiError> {
    require_ids(alert_ids)?;
    let deleted = store.delete_alerts(alert_ids);
    info!("ALERTS_BULK_DELETED count={}", deleted);
    Ok(deleted)
}

fn require_ids(alert_ids: &[u64]) -> Result<(), ApiError> {
    if alert_ids.is_empty() {
        return Err(ApiError::BadPayload("no alert ids provided".to_string()));
    }
    Ok(())
}

/// Deliver resolution notices on a detached thread. The channel list is
/// snapshotted by the caller so the thread never touches the store.
fn dispatch_resolution(channels: Vec<NotificationChannel>, alert: Alert) {
    if channels.is_empty() {
        return;
    }
    std::thread::spawn(move || {
        for channel in channels {
            match deliver_resolution(&channel, &alert) {
                Ok(()) => {}
                Err(err) => error!(
                    "NOTIFY_FAILED channel={:?} alert_id={} error={}",
                    channel.name, alert.id, err
                ),
            }
        }
    });
}

fn deliver_resolution(channel: &NotificationChannel, alert: &Alert) -> anyhow::Result<()> {
    match channel.channel_type {
        ChannelType::Email => {
            info!(
                "NOTIFY_RESOLUTION kind=email channel={:?} alert={:?}",
                channel.name, alert.title
            );
        }
        ChannelType::Discord => {
            info!(
                "NOTIFY_RESOLUTION kind=discord channel={:?} alert={:?}",
                channel.name, alert.title
            );
        }
        ChannelType::Slack | ChannelType::Webhook => {
            warn!(
                "NOTIFY_SKIPPED channel={:?} reason=unsupported_channel_type",
                channel.name
            );
        }
    }
    Ok(())
}
