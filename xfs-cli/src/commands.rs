//! Sub-command implementations. Each maps onto one proxy operation and
//! prints its result as pretty JSON.

use std::error::Error;

use clap::Subcommand;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use xfs_core::{DeviceEvent, DeviceProxy, Frame};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Query the live device status.
    Status,
    /// Show the (cached) device capabilities.
    Capabilities,
    /// Run an arbitrary info query.
    Info {
        /// Category, e.g. WFS_INF_CDM_CASH_UNIT_INFO.
        category: String,
        /// Query details as JSON.
        query: Option<String>,
    },
    /// Issue a command.
    Execute {
        /// Command code, e.g. WFS_CMD_CDM_DISPENSE.
        command: String,
        /// Command data as JSON.
        payload: Option<String>,
        /// Wait for the completion and print it.
        #[arg(long)]
        wait: bool,
    },
    /// Cancel a request, or the device's current command.
    Cancel {
        /// Request id to cancel.
        request_id: Option<String>,
        /// Block until the cancel and its target have both finished.
        #[arg(long)]
        sync: bool,
    },
    /// Print device events until Ctrl-C.
    Watch,
}

/// Parse an optional JSON argument; absent means `null`.
pub fn parse_json(arg: Option<&str>) -> Result<Value, serde_json::Error> {
    match arg {
        Some(text) => serde_json::from_str(text),
        None => Ok(Value::Null),
    }
}

/// JSON rendering of an event for `watch` and `execute --wait`.
pub fn event_json(event: &DeviceEvent) -> Value {
    let frame = |kind: &str, f: &Frame| json!({"event": kind, "message": f});
    match event {
        DeviceEvent::ExecuteComplete(f) => frame("execute_complete", f),
        DeviceEvent::ExecuteEvent(f) => frame("execute_event", f),
        DeviceEvent::CancelComplete(f) => frame("cancel_complete", f),
        DeviceEvent::ServiceEvent(f) => frame("service_event", f),
        DeviceEvent::UserEvent(f) => frame("user_event", f),
        DeviceEvent::Broadcast {
            message,
            command_code,
            payload,
        } => json!({
            "event": "broadcast",
            "message": message,
            "command": command_code,
            "payload": payload,
        }),
        DeviceEvent::SystemEvent {
            message,
            command_code,
            payload,
        } => json!({
            "event": "system_event",
            "message": message,
            "command": command_code,
            "payload": payload,
        }),
        DeviceEvent::Disconnected => json!({"event": "disconnected"}),
    }
}

fn print(value: &impl serde::Serialize) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn unreachable(proxy: &DeviceProxy) -> Box<dyn Error> {
    format!("device server {} unreachable", proxy.endpoint()).into()
}

pub async fn run(command: Command, proxy: &DeviceProxy) -> CliResult {
    match command {
        Command::Status => print(&proxy.status().await),
        Command::Capabilities => print(&proxy.capabilities().await),
        Command::Info { category, query } => {
            let query = parse_json(query.as_deref())?;
            let reply = proxy.get_info(&category, query).await;
            if reply.is_empty() {
                return Err(unreachable(proxy));
            }
            print(&reply)
        }
        Command::Execute {
            command,
            payload,
            wait,
        } => {
            let payload = parse_json(payload.as_deref())?;
            // Subscribe first so a fast completion is not missed.
            let mut events = proxy.subscribe();
            let id = proxy
                .issue_command(&command, payload)
                .await
                .ok_or_else(|| unreachable(proxy))?;
            print(&json!({"request_id": id}))?;
            if !wait {
                return Ok(());
            }
            loop {
                match events.recv().await {
                    Ok(DeviceEvent::ExecuteComplete(frame)) if frame.msgid() == Some(id.as_str()) => {
                        return print(&frame);
                    }
                    Ok(event @ DeviceEvent::ExecuteEvent(_)) => print(&event_json(&event))?,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("skipped {n} events"),
                    Err(RecvError::Closed) => return Err("event channel closed".into()),
                }
            }
        }
        Command::Cancel { request_id, sync } => {
            let target = request_id.as_deref();
            if sync {
                if !proxy.sync_cancel(target).await {
                    return Err(unreachable(proxy));
                }
                print(&json!({"cancelled": target}))
            } else {
                let id = proxy.cancel(target).await.ok_or_else(|| unreachable(proxy))?;
                print(&json!({"request_id": id}))
            }
        }
        Command::Watch => {
            if !proxy.connect().await {
                return Err(unreachable(proxy));
            }
            let mut events = proxy.subscribe();
            info!(device = proxy.identity(), "watching events; Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl-C received; stopping");
                        return Ok(());
                    }
                    event = events.recv() => match event {
                        Ok(event) => print(&event_json(&event))?,
                        Err(RecvError::Lagged(n)) => warn!("skipped {n} events"),
                        Err(RecvError::Closed) => return Ok(()),
                    },
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
