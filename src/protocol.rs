//! Wire types for the Foyer REST API and push channel.
//!
//! REST payloads are plain camelCase JSON. Push events arrive as text frames
//! carrying a tagged object `{"eventType": "...", ...}`; [`PushEvent`] is the
//! closed union of every event kind the server emits, so dispatch over it is
//! compiler-checked exhaustive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::MemberProfile;

// ── REST payloads ───────────────────────────────────────────────────

/// Response of `GET /session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProbe {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberProfile>,
}

/// Body of `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

/// Response of a successful `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub member: MemberProfile,
}

/// Error body shape returned by every write endpoint on rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}

// ── Push events ─────────────────────────────────────────────────────

/// Coarse event category used for debounced refresh routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Booking lifecycle changes.
    Booking,
    /// Member directory changes, including tier and stats updates.
    Directory,
    /// Announcement changes.
    Announcement,
    /// Billing changes.
    Billing,
}

/// A server-pushed real-time event.
///
/// The tag is the server's `eventType` string; unknown tags fail to parse and
/// are dropped (with a log line) by the realtime loop rather than crashing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "eventType", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PushEvent {
    /// A booking was created, changed, or cancelled.
    Booking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// One or more directory entries changed.
    DirectoryUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// An announcement was created, edited, or removed.
    AnnouncementUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A member's billing state changed.
    BillingUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A member's tier changed.
    TierUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A member's visit/engagement counters were recomputed.
    MemberStatsUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl PushEvent {
    /// The coarse category this event belongs to.
    ///
    /// Tier and stats updates count as directory traffic: they arrive in the
    /// same bulk-operation storms and invalidate the same directory view.
    pub fn category(&self) -> EventCategory {
        match self {
            PushEvent::Booking { .. } => EventCategory::Booking,
            PushEvent::DirectoryUpdate { .. }
            | PushEvent::TierUpdate { .. }
            | PushEvent::MemberStatsUpdated { .. } => EventCategory::Directory,
            PushEvent::AnnouncementUpdate { .. } => EventCategory::Announcement,
            PushEvent::BillingUpdate { .. } => EventCategory::Billing,
        }
    }

    /// The id of the resource the event refers to, when the server sent one.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            PushEvent::Booking { resource_id, .. }
            | PushEvent::DirectoryUpdate { resource_id, .. }
            | PushEvent::AnnouncementUpdate { resource_id, .. }
            | PushEvent::BillingUpdate { resource_id, .. }
            | PushEvent::TierUpdate { resource_id, .. }
            | PushEvent::MemberStatsUpdated { resource_id, .. } => resource_id.as_deref(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn push_event_parses_server_tag_names() {
        let json = r#"{"eventType": "booking", "resourceId": "b-12", "status": "pending"}"#;
        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, PushEvent::Booking { .. }));
        assert_eq!(event.resource_id(), Some("b-12"));

        let json = r#"{"eventType": "member-stats-updated", "resourceId": "m-4"}"#;
        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, PushEvent::MemberStatsUpdated { .. }));

        let json = r#"{"eventType": "directory-update"}"#;
        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.category(), EventCategory::Directory);
    }

    #[test]
    fn unknown_event_type_fails_to_parse() {
        let json = r#"{"eventType": "espresso-machine-on-fire"}"#;
        assert!(serde_json::from_str::<PushEvent>(json).is_err());
    }

    #[test]
    fn tier_and_stats_updates_share_the_directory_category() {
        let tier: PushEvent =
            serde_json::from_str(r#"{"eventType": "tier-update", "tier": "gold"}"#).unwrap();
        let stats: PushEvent =
            serde_json::from_str(r#"{"eventType": "member-stats-updated"}"#).unwrap();
        assert_eq!(tier.category(), EventCategory::Directory);
        assert_eq!(stats.category(), EventCategory::Directory);
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let json = r#"{"eventType": "booking", "timestamp": "2026-08-01T10:30:00Z"}"#;
        let event: PushEvent = serde_json::from_str(json).unwrap();
        if let PushEvent::Booking { timestamp, .. } = event {
            assert!(timestamp.is_some());
        } else {
            panic!("expected booking event");
        }
    }

    #[test]
    fn session_probe_shapes() {
        let json = r#"{"authenticated": false}"#;
        let probe: SessionProbe = serde_json::from_str(json).unwrap();
        assert!(!probe.authenticated);
        assert!(probe.member.is_none());
    }
}
