// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger entries.
//!
//! Entries follow a state machine:
//! - [`Pending`] → [`Success`] (lead won, or recorded as already settled)
//! - [`Pending`] → [`Cancelled`] (lead lost)
//!
//! [`Success`] and [`Cancelled`] are terminal; corrections are new offsetting
//! entries, never edits.
//!
//! [`Pending`]: EntryStatus::Pending
//! [`Success`]: EntryStatus::Success
//! [`Cancelled`]: EntryStatus::Cancelled

use crate::base::{AccountId, EntryId, IdempotencyKey, Role};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Credit,
    Debit,
    Withdrawal,
    PointsCredit,
    PointsDebit,
}

impl EntryKind {
    pub const ALL: [EntryKind; 5] = [
        EntryKind::Credit,
        EntryKind::Debit,
        EntryKind::Withdrawal,
        EntryKind::PointsCredit,
        EntryKind::PointsDebit,
    ];

    /// `true` for kinds that move loyalty points rather than currency.
    pub fn is_points(&self) -> bool {
        matches!(self, EntryKind::PointsCredit | EntryKind::PointsDebit)
    }

    /// `true` for kinds that take value out of an account.
    pub fn is_outflow(&self) -> bool {
        matches!(
            self,
            EntryKind::Debit | EntryKind::Withdrawal | EntryKind::PointsDebit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "CREDIT",
            EntryKind::Debit => "DEBIT",
            EntryKind::Withdrawal => "WITHDRAWAL",
            EntryKind::PointsCredit => "POINTS_CREDIT",
            EntryKind::PointsDebit => "POINTS_DEBIT",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREDIT" => Ok(EntryKind::Credit),
            "DEBIT" => Ok(EntryKind::Debit),
            "WITHDRAWAL" => Ok(EntryKind::Withdrawal),
            "POINTS_CREDIT" | "LOYALITY_POINT_CREDIT" => Ok(EntryKind::PointsCredit),
            "POINTS_DEBIT" | "LOYALITY_POINT_DEBIT" => Ok(EntryKind::PointsDebit),
            other => Err(ValidationError::UnknownKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Success,
    Cancelled,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Success => "SUCCESS",
            EntryStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(EntryStatus::Pending),
            "SUCCESS" => Ok(EntryStatus::Success),
            "CANCELLED" => Ok(EntryStatus::Cancelled),
            other => Err(ValidationError::InvalidStatus(other.to_owned())),
        }
    }
}

/// One immutable record of a requested balance or points change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub created_by: AccountId,
    pub kind: EntryKind,
    pub amount: u64,
    pub reference: String,
    pub idempotency_key: IdempotencyKey,
    pub status: EntryStatus,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Bumped by the store on every committed change.
    pub version: u64,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        created_by: AccountId,
        kind: EntryKind,
        amount: u64,
        reference: impl Into<String>,
        idempotency_key: IdempotencyKey,
        comment: impl Into<String>,
        status: EntryStatus,
    ) -> Self {
        let now = Utc::now();
        LedgerEntry {
            id: EntryId::new(),
            account_id,
            created_by,
            kind,
            amount,
            reference: reference.into(),
            idempotency_key,
            status,
            comment: comment.into(),
            created_at: now,
            settled_at: status.is_terminal().then_some(now),
            version: 0,
        }
    }

    /// Moves a pending entry to `status`.
    ///
    /// Terminal entries never change again.
    pub fn transition(&mut self, status: EntryStatus) -> Result<(), ValidationError> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(ValidationError::InvalidStatus(format!(
                "{} -> {}",
                self.status, status
            )));
        }
        self.status = status;
        self.settled_at = Some(Utc::now());
        Ok(())
    }
}

/// Input to [`Engine::record_transaction`](crate::Engine::record_transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Floored to whole units before validation.
    pub amount: Decimal,
    pub reference: String,
    pub idempotency_key: IdempotencyKey,
    pub comment: String,
    pub status: EntryStatus,
}

/// Which entry kinds each role may record directly.
///
/// Commission-granting kinds are reserved for administrators; the lead
/// settlement path creates them on the CRM's behalf.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities;

impl Capabilities {
    pub fn allowed(role: Role) -> &'static [EntryKind] {
        match role {
            Role::Admin => &EntryKind::ALL,
            Role::Sales => &[EntryKind::Debit, EntryKind::Withdrawal, EntryKind::PointsDebit],
            Role::User | Role::GoldUser => &[],
        }
    }

    pub fn permits(role: Role, kind: EntryKind) -> bool {
        Self::allowed(role).contains(&kind)
    }
}
