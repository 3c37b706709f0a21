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

//! Ledger storage.
//!
//! A [`Store`] holds accounts, ledger entries and lead records. All writes go
//! through a [`UnitOfWork`]: reads made through the unit are tracked, writes
//! are staged, and [`UnitOfWork::commit`] makes every staged write visible at
//! once or none of them. Dropping a unit without committing discards it.
//!
//! Commits are optimistic. If anything the unit read was changed by another
//! commit in the meantime, `commit` fails with [`StoreError::Conflict`] and
//! the caller starts over with fresh reads.
//!
//! Logical layout every backend must provide:
//! - accounts keyed by id, with a unique index on the normalised phone
//! - entries keyed by id, with a unique index on the idempotency key, an
//!   index on reference (pending scans) and an index on account (statements)
//! - leads keyed by their CRM id

mod memory;

pub use memory::MemoryStore;

use crate::account::Account;
use crate::base::{AccountId, EntryId, IdempotencyKey, LeadId};
use crate::error::StoreError;
use crate::lead::Lead;
use crate::transaction::LedgerEntry;
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Opens a new transactional scope.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn account_by_phone(&self, phone: &str) -> Result<Option<Account>, StoreError>;

    async fn entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, StoreError>;

    async fn entry_by_key(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries for `account`, newest first.
    async fn statement(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Every entry carrying `reference`, in creation order.
    async fn entries_for_reference(&self, reference: &str)
    -> Result<Vec<LedgerEntry>, StoreError>;

    async fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError>;
}

/// A transactional scope over a [`Store`].
///
/// Reads see the unit's own staged writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn account_by_phone(&mut self, phone: &str) -> Result<Option<Account>, StoreError>;

    async fn entry(&mut self, id: EntryId) -> Result<Option<LedgerEntry>, StoreError>;

    async fn key_exists(&mut self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// PENDING entries whose reference equals `reference`, in creation order.
    async fn pending_for_reference(
        &mut self,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn lead(&mut self, id: &LeadId) -> Result<Option<Lead>, StoreError>;

    /// Stages an insert or update of an account.
    fn put_account(&mut self, account: Account);

    /// Stages an insert or update of a ledger entry.
    fn put_entry(&mut self, entry: LedgerEntry);

    /// Stages an insert or update of a lead.
    fn put_lead(&mut self, lead: Lead);

    /// Applies every staged write atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] - Something read by this unit changed.
    /// - [`StoreError::DuplicateKey`] - A unique index rejected a staged write.
    /// - [`StoreError::Unavailable`] - The backend failed; nothing was applied.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
