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

//! Lead records and their outcome state machine.
//!
//! ```text
//! Open ──won──► Won
//!   │
//!   └───lost──► Lost
//! ```
//!
//! `Won` and `Lost` are terminal. The CRM owns the lead itself; the ledger
//! only keeps what settlement needs: the owner, the resolved outcome, and the
//! commission entry already created for it.

use crate::base::{AccountId, EntryId, LeadId};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadOutcome {
    Open,
    Won,
    Lost,
}

impl LeadOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LeadOutcome::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub owner: AccountId,
    pub status: LeadOutcome,
    /// Last status string received from the CRM.
    pub external_status: String,
    pub commission_entry: Option<EntryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every committed change.
    pub version: u64,
}

impl Lead {
    pub fn new(id: LeadId, owner: AccountId) -> Self {
        let now = Utc::now();
        Lead {
            id,
            owner,
            status: LeadOutcome::Open,
            external_status: "New".to_owned(),
            commission_entry: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn record_status(&mut self, external: &str, outcome: LeadOutcome) {
        self.external_status = external.to_owned();
        self.status = outcome;
        self.updated_at = Utc::now();
    }
}

/// Resolves raw CRM status strings to a [`LeadOutcome`].
///
/// Matching ignores case and surrounding whitespace. Any status that is
/// neither won nor lost keeps the lead open.
#[derive(Debug, Clone, Default)]
pub struct StatusMap {
    outcomes: HashMap<String, LeadOutcome>,
}

impl StatusMap {
    pub fn new<W, L>(won: W, lost: L) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
    {
        let mut outcomes = HashMap::new();
        for status in won {
            outcomes.insert(Self::canonical(status.as_ref()), LeadOutcome::Won);
        }
        for status in lost {
            outcomes.insert(Self::canonical(status.as_ref()), LeadOutcome::Lost);
        }
        StatusMap { outcomes }
    }

    /// # Errors
    ///
    /// [`ValidationError::UnknownStatus`] for a blank status.
    pub fn resolve(&self, external: &str) -> Result<LeadOutcome, ValidationError> {
        let key = Self::canonical(external);
        if key.is_empty() {
            return Err(ValidationError::UnknownStatus(external.to_owned()));
        }
        Ok(self.outcomes.get(&key).copied().unwrap_or(LeadOutcome::Open))
    }

    fn canonical(status: &str) -> String {
        status.trim().to_lowercase()
    }
}
