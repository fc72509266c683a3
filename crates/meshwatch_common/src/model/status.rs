//! Derived liveness record per node.
//!
//! A node moves `Unknown -> Online -> Offline -> Expired`, re-entering
//! `Online` from `Offline` whenever it is heard from again. `Unknown` is the
//! absence of a record. `Expired` is terminal and has no representation: the
//! record and every other entity of the node are deleted.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout written by older map backends, no zone, UTC implied.
pub const LEGACY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unparseable timestamp '{value}'")]
pub struct TimestampError {
    pub value: String,
}

/// Format a timestamp the way it is persisted (RFC 3339, second precision).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a persisted timestamp: RFC 3339 first, then the legacy layout.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, LEGACY_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TimestampError {
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Unknown,
    Online,
    Offline,
}

impl LivenessState {
    /// State of a node given its stored status, if any.
    pub fn of(status: Option<&NodeStatus>) -> Self {
        status.map(NodeStatus::state).unwrap_or(LivenessState::Unknown)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(alias = "NodeId", default)]
    pub node_id: String,
    #[serde(alias = "Firstseen", default)]
    pub firstseen: String,
    #[serde(alias = "Lastseen", default)]
    pub lastseen: String,
    #[serde(alias = "Online", default)]
    pub online: bool,
    #[serde(alias = "Gateway", default)]
    pub gateway: bool,
}

impl NodeStatus {
    /// Status for a node heard from for the first time.
    pub fn first_seen(node_id: &str, now: DateTime<Utc>) -> Self {
        let stamp = format_timestamp(now);
        Self {
            node_id: node_id.to_string(),
            firstseen: stamp.clone(),
            lastseen: stamp,
            online: true,
            gateway: false,
        }
    }

    pub fn state(&self) -> LivenessState {
        if self.online {
            LivenessState::Online
        } else {
            LivenessState::Offline
        }
    }

    pub fn lastseen_at(&self) -> Result<DateTime<Utc>, TimestampError> {
        parse_timestamp(&self.lastseen)
    }

    /// Apply a telemetry arrival: back online, `lastseen` refreshed.
    ///
    /// `lastseen` never moves backwards; an unparseable stored value is
    /// overwritten.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.online = true;
        let keep_stored = matches!(self.lastseen_at(), Ok(stored) if stored > now);
        if !keep_stored {
            self.lastseen = format_timestamp(now);
        }
        if self.firstseen.is_empty() {
            self.firstseen = self.lastseen.clone();
        }
    }

    /// Whether this node has been silent for longer than `window`.
    pub fn is_silent_for(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<bool, TimestampError> {
        Ok(now - self.lastseen_at()? > window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_parse_current_format() {
        let at = parse_timestamp("2016-03-01T12:30:00Z").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2016, 3, 1, 12, 30, 0).unwrap());
        let offset = parse_timestamp("2016-03-01T13:30:00+01:00").unwrap();
        assert_eq!(offset, at);
    }

    #[test]
    fn test_parse_legacy_format() {
        let at = parse_timestamp("2015-11-20T08:15:42").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2015, 11, 20, 8, 15, 42).unwrap());
        assert!(parse_timestamp("2015-11-20T08:15:42.250").is_ok());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert_eq!(err.value, "yesterday");
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_first_seen_equals_last_seen() {
        let now = Utc::now();
        let status = NodeStatus::first_seen("n1", now);
        assert_eq!(status.firstseen, status.lastseen);
        assert!(status.online);
        assert_eq!(status.state(), LivenessState::Online);
    }

    #[test]
    fn test_liveness_state_of_optional_status() {
        assert_eq!(LivenessState::of(None), LivenessState::Unknown);
        let mut status = NodeStatus::first_seen("n1", Utc::now());
        assert_eq!(LivenessState::of(Some(&status)), LivenessState::Online);
        status.online = false;
        assert_eq!(LivenessState::of(Some(&status)), LivenessState::Offline);
    }

    #[test]
    fn test_touch_brings_node_back_online() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut status = NodeStatus::first_seen("n1", start);
        status.online = false;
        status.touch(start + Duration::minutes(10));
        assert!(status.online);
        assert_eq!(status.lastseen, "2020-01-01T00:10:00Z");
        assert_eq!(status.firstseen, "2020-01-01T00:00:00Z");
    }

    #[test]
    fn test_touch_never_moves_lastseen_backwards() {
        let later = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
        let mut status = NodeStatus::first_seen("n1", later);
        status.touch(later - Duration::hours(1));
        assert_eq!(status.lastseen, "2020-01-01T12:00:00Z");
    }

    #[test]
    fn test_touch_replaces_unparseable_lastseen() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut status = NodeStatus {
            node_id: "n1".into(),
            lastseen: "garbage".into(),
            ..Default::default()
        };
        status.touch(now);
        assert_eq!(status.lastseen, "2020-01-01T00:00:00Z");
        assert_eq!(status.firstseen, status.lastseen);
    }

    #[test]
    fn test_silence_window() {
        let seen = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let status = NodeStatus::first_seen("n1", seen);
        let window = Duration::minutes(15);
        assert!(!status.is_silent_for(seen + Duration::minutes(15), window).unwrap());
        assert!(status.is_silent_for(seen + Duration::minutes(16), window).unwrap());
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let status: NodeStatus = serde_json::from_str(
            r#"{"Firstseen":"2015-11-20T08:15:42","Lastseen":"2015-11-21T08:15:42","Online":true,"Gateway":false,"NodeId":"abc"}"#,
        )
        .unwrap();
        assert_eq!(status.node_id, "abc");
        assert!(status.online);
        assert!(status.lastseen_at().is_ok());
    }
}
