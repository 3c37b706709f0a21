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

//! Error types for ledger processing.

use crate::base::{AccountId, IdempotencyKey, LeadId};
use crate::transaction::EntryKind;
use thiserror::Error;

/// Ledger processing errors.
///
/// Every variant except [`LedgerError::Persistence`] is terminal for the given
/// input; persistence failures are fully rolled back and may be retried with
/// the same idempotency key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or disallowed input
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Target account does not exist
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// Lead was never registered
    #[error("lead {0} not found")]
    LeadNotFound(LeadId),

    /// Debit would take the balance or points below zero
    #[error("insufficient funds on account {account}: {kind} of {requested} exceeds {available}")]
    InsufficientFunds {
        account: AccountId,
        kind: EntryKind,
        requested: u64,
        available: u64,
    },

    /// Idempotency key was already used
    #[error("idempotency key {0} already processed")]
    DuplicateSettlement(IdempotencyKey),

    /// Account is suspended
    #[error("account {0} is not active")]
    AccountInactive(AccountId),

    /// Store unavailable or unit of work aborted
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl LedgerError {
    /// Returns `true` when the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Persistence(_))
    }
}

/// Reasons a request is rejected before touching the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be at least one whole unit")]
    NonPositiveAmount,

    #[error("field `{0}` is required")]
    BlankField(&'static str),

    #[error("role {role} may not record {kind} entries")]
    KindNotAllowed { role: String, kind: EntryKind },

    #[error("entries cannot be recorded with status {0}")]
    InvalidStatus(String),

    #[error("contact {0} is already registered")]
    DuplicateContact(String),

    #[error("lead {0} is already registered")]
    DuplicateLead(String),

    #[error("unknown lead status `{0}`")]
    UnknownStatus(String),

    #[error("unknown role `{0}`")]
    UnknownRole(String),

    #[error("unknown entry kind `{0}`")]
    UnknownKind(String),

    #[error("amount overflows the account total")]
    Overflow,

    #[error("operation requires the admin role")]
    NotPermitted,
}

/// Failures reported by a [`Store`](crate::store::Store) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record read by the unit of work changed before commit
    #[error("concurrent modification detected")]
    Conflict,

    /// A unique constraint rejected the commit
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),

    /// Backend cannot be reached
    #[error("store unavailable")]
    Unavailable,

    /// The unit of work did not commit within the configured bound
    #[error("unit of work timed out")]
    Timeout,
}
