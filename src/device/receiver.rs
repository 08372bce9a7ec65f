use crate::status::StatusSnapshot;
use serde_json::{json, Value};

pub const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const NS_DASHCAST: &str = "urn:x-cast:com.madmod.dashcast";

pub const DASHCAST_APP_ID: &str = "84912283";
pub const RECEIVER_ID: &str = "receiver-0";

/// The application currently running on the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSession {
    pub app_id: String,
    pub session_id: String,
    pub transport_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverStatus {
    pub snapshot: StatusSnapshot,
    pub app: Option<AppSession>,
    pub muted: bool,
}

pub fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

pub fn request_id(value: &Value) -> Option<u32> {
    value
        .get("requestId")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
}

/// Parse a `RECEIVER_STATUS` payload.
///
/// With `ignore_cec` the HDMI-CEC derived flags are replaced by the values a
/// receiver reports when it has no CEC information.
pub fn parse_receiver_status(value: &Value, ignore_cec: bool) -> Option<ReceiverStatus> {
    if message_type(value) != Some("RECEIVER_STATUS") {
        return None;
    }
    let status = value.get("status")?;
    let app_data = status
        .get("applications")
        .and_then(Value::as_array)
        .and_then(|apps| apps.first());

    let text = |field: &str| {
        app_data
            .and_then(|app| app.get(field))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let (is_active_input, is_stand_by) = if ignore_cec {
        (false, true)
    } else {
        (
            status
                .get("isActiveInput")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            status
                .get("isStandBy")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        )
    };

    let snapshot = StatusSnapshot {
        displayed_app_name: text("displayName"),
        status_text: text("statusText"),
        is_stand_by,
        is_active_input,
    };

    let app = app_data.and_then(|app| {
        Some(AppSession {
            app_id: app.get("appId")?.as_str()?.to_string(),
            session_id: app.get("sessionId")?.as_str()?.to_string(),
            transport_id: app.get("transportId")?.as_str()?.to_string(),
        })
    });

    let muted = status
        .get("volume")
        .and_then(|v| v.get("muted"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(ReceiverStatus {
        snapshot,
        app,
        muted,
    })
}

/// Reason carried by `LAUNCH_ERROR` / `INVALID_REQUEST` style replies.
pub fn failure_reason(value: &Value) -> Option<String> {
    let kind = message_type(value)?;
    if !matches!(kind, "LAUNCH_ERROR" | "INVALID_REQUEST" | "LOAD_FAILED") {
        return None;
    }
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("no reason given");
    Some(format!("{kind}: {reason}"))
}

pub fn connect_payload() -> Value {
    json!({
        "type": "CONNECT",
        "origin": {},
        "userAgent": "dashcast",
        "senderInfo": {
            "sdkType": 2,
            "version": "15.605.1.3",
            "browserVersion": "44.0.2403.30",
            "platform": 4,
            "systemVersion": "Linux",
            "connectionType": 1
        }
    })
}

pub fn ping_payload() -> Value {
    json!({"type": "PING"})
}

pub fn pong_payload() -> Value {
    json!({"type": "PONG"})
}

pub fn get_status_payload(request_id: u32) -> Value {
    json!({"type": "GET_STATUS", "requestId": request_id})
}

pub fn set_muted_payload(request_id: u32, muted: bool) -> Value {
    json!({
        "type": "SET_VOLUME",
        "requestId": request_id,
        "volume": {"muted": muted}
    })
}

pub fn launch_payload(request_id: u32, app_id: &str) -> Value {
    json!({"type": "LAUNCH", "appId": app_id, "requestId": request_id})
}

pub fn stop_payload(request_id: u32, session_id: &str) -> Value {
    json!({"type": "STOP", "requestId": request_id, "sessionId": session_id})
}

pub fn dashcast_load_payload(url: &str, force: bool, reload_seconds: u32) -> Value {
    json!({
        "url": url,
        "force": force,
        "reload": reload_seconds != 0,
        "reload_time": reload_seconds.saturating_mul(1000)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_json(app: Value, extra: Value) -> Value {
        let mut status = json!({
            "applications": [app],
            "volume": {"level": 0.4, "muted": false}
        });
        if let (Some(target), Some(fields)) = (status.as_object_mut(), extra.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        json!({"type": "RECEIVER_STATUS", "requestId": 7, "status": status})
    }

    fn backdrop_app() -> Value {
        json!({
            "appId": "E8C28D3C",
            "displayName": "Backdrop",
            "sessionId": "s-1",
            "transportId": "t-1",
            "statusText": ""
        })
    }

    #[test]
    fn parses_idle_backdrop() {
        let value = status_json(
            backdrop_app(),
            json!({"isActiveInput": false, "isStandBy": true}),
        );
        let status = parse_receiver_status(&value, false).unwrap();
        assert_eq!(status.snapshot, StatusSnapshot::backdrop());
        assert_eq!(
            status.app,
            Some(AppSession {
                app_id: "E8C28D3C".to_string(),
                session_id: "s-1".to_string(),
                transport_id: "t-1".to_string(),
            })
        );
        assert!(!status.muted);
    }

    #[test]
    fn missing_cec_flags_use_receiver_defaults() {
        let value = status_json(backdrop_app(), json!({}));
        let status = parse_receiver_status(&value, false).unwrap();
        assert!(status.snapshot.is_stand_by);
        assert!(!status.snapshot.is_active_input);
    }

    #[test]
    fn ignore_cec_overrides_reported_flags() {
        let value = status_json(
            backdrop_app(),
            json!({"isActiveInput": true, "isStandBy": false}),
        );
        let honoured = parse_receiver_status(&value, false).unwrap();
        assert!(honoured.snapshot.is_active_input);

        let ignored = parse_receiver_status(&value, true).unwrap();
        assert!(!ignored.snapshot.is_active_input);
        assert!(ignored.snapshot.is_stand_by);
    }

    #[test]
    fn no_application_yields_empty_name_and_no_session() {
        let value = json!({
            "type": "RECEIVER_STATUS",
            "status": {"volume": {"muted": true}}
        });
        let status = parse_receiver_status(&value, false).unwrap();
        assert_eq!(status.snapshot.displayed_app_name, "");
        assert!(status.app.is_none());
        assert!(status.muted);
    }

    #[test]
    fn other_messages_are_not_statuses() {
        let value = json!({"type": "MEDIA_STATUS", "status": []});
        assert!(parse_receiver_status(&value, false).is_none());
    }

    #[test]
    fn request_id_is_read_when_present() {
        assert_eq!(request_id(&json!({"requestId": 12})), Some(12));
        assert_eq!(request_id(&json!({"type": "PING"})), None);
    }

    #[test]
    fn launch_error_has_reason() {
        let value = json!({"type": "LAUNCH_ERROR", "requestId": 3, "reason": "NOT_FOUND"});
        assert_eq!(
            failure_reason(&value).as_deref(),
            Some("LAUNCH_ERROR: NOT_FOUND")
        );
        assert!(failure_reason(&json!({"type": "RECEIVER_STATUS"})).is_none());
    }

    #[test]
    fn dashcast_payload_without_reload() {
        let value = dashcast_load_payload("https://home-assistant.io", false, 0);
        assert_eq!(value["url"], "https://home-assistant.io");
        assert_eq!(value["reload"], false);
        assert_eq!(value["reload_time"], 0);
    }

    #[test]
    fn dashcast_payload_with_reload() {
        let value = dashcast_load_payload("https://example.com", true, 5);
        assert_eq!(value["force"], true);
        assert_eq!(value["reload"], true);
        assert_eq!(value["reload_time"], 5000);
    }

    #[test]
    fn mute_payload_only_touches_muted() {
        let value = set_muted_payload(4, true);
        assert_eq!(value["volume"], json!({"muted": true}));
        assert!(value["volume"].get("level").is_none());
    }
}
