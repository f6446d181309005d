//! Domain types for the Foyer membership platform.
//!
//! Wire shapes match the Foyer API's camelCase JSON. The server is
//! authoritative for every generated field (ids, counters, billing linkage);
//! these types never invent data locally except for the temporary ids the
//! mutation layer stamps on optimistic inserts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Roles and status ────────────────────────────────────────────────

/// Access role attached to a member profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ordinary club member.
    #[default]
    Member,
    /// Front-of-house staff.
    Staff,
    /// Back-office administrator.
    Admin,
}

impl Role {
    /// Returns `true` for roles allowed to hold a real-time push connection
    /// and read the member directory.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }
}

/// Membership status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

// ── Identity ────────────────────────────────────────────────────────

/// An authenticated member identity.
///
/// `email` is the case-insensitive unique key across the platform; compare
/// with [`MemberProfile::email_matches`] rather than `==`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: MemberStatus,
    /// Stripe billing linkage, when the member has a payment profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<String>,
    /// Mindbody scheduling linkage, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mindbody_client_id: Option<String>,
    /// Lifetime visit counter, maintained server-side.
    #[serde(default)]
    pub visit_count: u32,
    /// Events attended, maintained server-side.
    #[serde(default)]
    pub events_attended: u32,
}

impl MemberProfile {
    /// Case-insensitive email comparison, the platform's identity equality.
    pub fn email_matches(&self, other: &str) -> bool {
        self.email.eq_ignore_ascii_case(other)
    }
}

// ── Announcements ───────────────────────────────────────────────────

/// Announcement display priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A staff-authored announcement with an optional activity window.
///
/// Either date bound may be absent; an open-ended bound never excludes a day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

// ── Café menu ───────────────────────────────────────────────────────

/// A café menu item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CafeItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

// ── Events ──────────────────────────────────────────────────────────

/// A club event listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClubEvent {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

// ── Bookings ────────────────────────────────────────────────────────

/// A court/room booking as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub member_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// Player count declared on the booking itself, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_count: Option<u32>,
    #[serde(default)]
    pub status: String,
}

// ── Notification counts ─────────────────────────────────────────────

/// Server-reported pending counts feeding the staff badge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounts {
    #[serde(default)]
    pub pending_bookings: u32,
    #[serde(default)]
    pub pending_requests: u32,
}

// ── Pagination ──────────────────────────────────────────────────────

/// Paginated list wrapper used by directory-style endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
}

// ── Keys ────────────────────────────────────────────────────────────

/// A resource item addressable by a stable string key.
///
/// Implemented by every collection type the optimistic mutation layer
/// manages. `set_key` exists so the layer can stamp temporary ids on
/// optimistic inserts before the server assigns the canonical one.
pub trait Keyed: Clone + Send + Sync + 'static {
    /// The item's current key (canonical id or temporary placeholder).
    fn key(&self) -> &str;

    /// Replace the item's key.
    fn set_key(&mut self, key: String);
}

macro_rules! impl_keyed {
    ($($ty:ty),+ $(,)?) => {
        $(impl Keyed for $ty {
            fn key(&self) -> &str {
                &self.id
            }

            fn set_key(&mut self, key: String) {
                self.id = key;
            }
        })+
    };
}

impl_keyed!(MemberProfile, Announcement, CafeItem, ClubEvent, Booking);
