// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record types that flow through both tiers.
//!
//! [`UserRecord`] and [`QuizRecord`] are serialized as JSON for the cache
//! tier and mapped onto columns for the durable tier.
//!
//! # Example
//!
//! ```
//! use record_sync::{UserRecord, UserStatus};
//!
//! let mut user = UserRecord::new(42, false);
//! assert_eq!(user.status, UserStatus::Active);
//!
//! user.apply_warning_delta(3);
//! user.apply_warning_delta(-100);
//! assert_eq!(user.warns, 0); // clamped, never negative
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

/// Lifecycle status of a user. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Muted,
    Restricted,
    Banned,
}

impl UserStatus {
    pub const ALL: [UserStatus; 4] = [Self::Active, Self::Muted, Self::Restricted, Self::Banned];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Muted => "muted",
            Self::Restricted => "restricted",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "muted" => Ok(Self::Muted),
            "restricted" => Ok(Self::Restricted),
            "banned" => Ok(Self::Banned),
            other => Err(StorageError::Decode(format!("unknown user status '{}'", other))),
        }
    }
}

/// A chat user as seen by the moderation and quiz collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Platform user id (unique)
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: String,
    /// Derived from the admin allow-list; overwritten on mismatch
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub warns: u32,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub is_winner: bool,
    /// Administrative title, preserved across writes
    #[serde(default)]
    pub admin_title: String,
    #[serde(default)]
    pub mute_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub message_count: u64,
}

impl UserRecord {
    /// A fresh record: empty names, `active`, all counters zero.
    #[must_use]
    pub fn new(id: i64, is_admin: bool) -> Self {
        Self {
            id,
            first_name: String::new(),
            username: String::new(),
            is_admin,
            warns: 0,
            status: UserStatus::Active,
            is_winner: false,
            admin_title: String::new(),
            mute_until: None,
            birthday: None,
            message_count: 0,
        }
    }

    /// Apply a signed change to the warning count, clamping at zero.
    pub fn apply_warning_delta(&mut self, delta: i64) {
        let next = (i64::from(self.warns)).saturating_add(delta);
        self.warns = next.clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Force the admin flag to match the allow-list.
    ///
    /// Returns `true` if the flag changed.
    pub fn reconcile_admin(&mut self, should_be_admin: bool) -> bool {
        if self.is_admin == should_be_admin {
            return false;
        }
        self.is_admin = should_be_admin;
        true
    }

    /// Apply a single-field update in place.
    pub fn apply(&mut self, field: &UserField) {
        match field {
            UserField::Warns(warns) => self.warns = *warns,
            UserField::Status(status) => self.status = *status,
            UserField::IsWinner(flag) => self.is_winner = *flag,
            UserField::IsAdmin(flag) => self.is_admin = *flag,
            UserField::AdminTitle(title) => self.admin_title = title.clone(),
            UserField::MuteUntil(until) => self.mute_until = *until,
            UserField::Birthday(date) => self.birthday = *date,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Decode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

/// A single column update, used by `update_user_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserField {
    Warns(u32),
    Status(UserStatus),
    IsWinner(bool),
    IsAdmin(bool),
    AdminTitle(String),
    MuteUntil(Option<DateTime<Utc>>),
    Birthday(Option<NaiveDate>),
}

impl UserField {
    /// Column name in the durable tier.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::Warns(_) => "warns",
            Self::Status(_) => "status",
            Self::IsWinner(_) => "is_winner",
            Self::IsAdmin(_) => "is_admin",
            Self::AdminTitle(_) => "admin_title",
            Self::MuteUntil(_) => "mute_until",
            Self::Birthday(_) => "birthday",
        }
    }
}

/// Boolean flags with aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFlag {
    Admin,
    Winner,
}

impl UserFlag {
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::Admin => "is_admin",
            Self::Winner => "is_winner",
        }
    }

    #[must_use]
    pub fn is_set(&self, user: &UserRecord) -> bool {
        match self {
            Self::Admin => user.is_admin,
            Self::Winner => user.is_winner,
        }
    }
}

/// Aggregate counts for one tier, used by the consistency audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub total: u64,
    pub active: u64,
    pub muted: u64,
    pub restricted: u64,
    pub banned: u64,
    pub admins: u64,
    pub winners: u64,
}

impl TierCounts {
    /// Count a set of records in memory.
    #[must_use]
    pub fn tally<'a>(users: impl IntoIterator<Item = &'a UserRecord>) -> Self {
        let mut counts = Self::default();
        for user in users {
            counts.total += 1;
            *counts.status_mut(user.status) += 1;
            if user.is_admin {
                counts.admins += 1;
            }
            if user.is_winner {
                counts.winners += 1;
            }
        }
        counts
    }

    #[must_use]
    pub fn by_status(&self, status: UserStatus) -> u64 {
        match status {
            UserStatus::Active => self.active,
            UserStatus::Muted => self.muted,
            UserStatus::Restricted => self.restricted,
            UserStatus::Banned => self.banned,
        }
    }

    pub fn status_mut(&mut self, status: UserStatus) -> &mut u64 {
        match status {
            UserStatus::Active => &mut self.active,
            UserStatus::Muted => &mut self.muted,
            UserStatus::Restricted => &mut self.restricted,
            UserStatus::Banned => &mut self.banned,
        }
    }
}

/// One quiz per calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRecord {
    /// Calendar day in the civil timezone (unique)
    pub date: NaiveDate,
    pub quote: String,
    pub answer: String,
    /// Time of day the quiz is posted
    pub scheduled_at: NaiveTime,
    pub active: bool,
    #[serde(default)]
    pub winner_id: Option<i64>,
}

impl QuizRecord {
    #[must_use]
    pub fn new(date: NaiveDate, quote: impl Into<String>, answer: impl Into<String>, scheduled_at: NaiveTime) -> Self {
        Self {
            date,
            quote: quote.into(),
            answer: answer.into(),
            scheduled_at,
            active: true,
            winner_id: None,
        }
    }

    /// Build a quiz for the civil day containing `at`.
    #[must_use]
    pub fn for_instant(
        at: DateTime<Utc>,
        offset: FixedOffset,
        quote: impl Into<String>,
        answer: impl Into<String>,
        scheduled_at: NaiveTime,
    ) -> Self {
        Self::new(at.with_timezone(&offset).date_naive(), quote, answer, scheduled_at)
    }

    /// Midnight of this quiz's day in the civil timezone.
    #[must_use]
    pub fn day_start(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        offset
            .from_local_datetime(&self.date.and_time(NaiveTime::MIN))
            .single()
    }

    /// Record a winner. Only the first call on an active quiz has an effect.
    ///
    /// Returns `true` if the quiz transitioned to completed.
    pub fn record_winner(&mut self, user_id: i64) -> bool {
        if !self.active {
            return false;
        }
        self.winner_id = Some(user_id);
        self.active = false;
        true
    }

    /// Complete without a winner. Returns `true` if the quiz was still active.
    pub fn complete(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Decode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
    }
}
