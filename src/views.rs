//! Derived view-state reducers.
//!
//! Pure computations layered on the synchronized state. Nothing here fetches
//! or mutates; callers recompute whenever an input changes and the results
//! have no independent source of truth.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::model::{Announcement, Priority};

// ── Announcements ───────────────────────────────────────────────────

/// Whether `announcement` is active on `today` (club-local calendar date).
///
/// Both bounds are inclusive and either may be open-ended: a missing start
/// never hides an announcement that has not "begun", a missing end never
/// expires one.
pub fn is_active(announcement: &Announcement, today: NaiveDate) -> bool {
    let started = announcement.start_date.is_none_or(|start| start <= today);
    let not_ended = announcement.end_date.is_none_or(|end| today <= end);
    started && not_ended
}

/// Active high-priority announcements the member has not dismissed.
pub fn unseen_high_priority<'a>(
    announcements: &'a [Announcement],
    dismissed: &HashSet<String>,
    today: NaiveDate,
) -> Vec<&'a Announcement> {
    announcements
        .iter()
        .filter(|a| a.priority == Priority::High)
        .filter(|a| is_active(a, today))
        .filter(|a| !dismissed.contains(&a.id))
        .collect()
}

// ── Pending badge ───────────────────────────────────────────────────

/// The staff badge: pending bookings plus pending booking-requests, with an
/// optimistic decrement per completed action.
///
/// The decrement is floored at zero and only an estimate; the next full
/// refetch ([`PendingBadge::refresh`]) replaces it with server truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingBadge {
    pending_bookings: u32,
    pending_requests: u32,
    optimistic_decrements: u32,
}

impl PendingBadge {
    /// Build a badge from server-reported counts.
    pub fn new(pending_bookings: u32, pending_requests: u32) -> Self {
        Self {
            pending_bookings,
            pending_requests,
            optimistic_decrements: 0,
        }
    }

    /// The number to display.
    pub fn value(&self) -> u32 {
        (self.pending_bookings + self.pending_requests).saturating_sub(self.optimistic_decrements)
    }

    /// Record that the user just completed a pending action; the badge drops
    /// by one immediately (never below zero).
    pub fn complete_action(&mut self) {
        self.optimistic_decrements = self.optimistic_decrements.saturating_add(1);
    }

    /// Replace the counts with fresh server truth, discarding optimistic
    /// decrements.
    pub fn refresh(&mut self, pending_bookings: u32, pending_requests: u32) {
        self.pending_bookings = pending_bookings;
        self.pending_requests = pending_requests;
        self.optimistic_decrements = 0;
    }
}

// ── Booking slot completeness ───────────────────────────────────────

/// Inputs for the booking slot-completeness reduction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotTally {
    /// Slots filled by linked members.
    pub linked_member_slots: u32,
    /// Slots filled by guests.
    pub guest_slots: u32,
    /// Expected player count from server-side validation, when present.
    pub expected_player_count: Option<u32>,
    /// Player count declared on the booking, when present.
    pub booking_player_count: Option<u32>,
    /// Total slot rows rendered for the booking.
    pub total_slot_rows: u32,
}

impl SlotTally {
    /// Slots actually filled.
    pub fn filled(&self) -> u32 {
        self.linked_member_slots + self.guest_slots
    }

    /// Slots expected: validation count, else the booking's declared count,
    /// else the number of slot rows.
    pub fn expected(&self) -> u32 {
        self.expected_player_count
            .or(self.booking_player_count)
            .unwrap_or(self.total_slot_rows)
    }

    /// Whether the booking has all its expected players.
    pub fn is_complete(&self) -> bool {
        self.filled() >= self.expected()
    }
}
