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

//! In-process [`Store`] backend.
//!
//! Tables are [`DashMap`]s. A store-wide gate keeps commits atomic: readers
//! share it, and a commit holds it exclusively for the short synchronous step
//! that validates and applies a unit. Units themselves run concurrently and
//! never hold the gate across an `.await`.
//!
//! The store also carries fault injection (unavailability, failing commits,
//! artificial latency) so callers can exercise their rollback and timeout
//! paths.

use super::{Store, UnitOfWork};
use crate::account::Account;
use crate::base::{AccountId, EntryId, IdempotencyKey, LeadId};
use crate::error::StoreError;
use crate::lead::Lead;
use crate::transaction::{EntryStatus, LedgerEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    failing_commits: AtomicU32,
    latency_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    gate: RwLock<()>,
    accounts: DashMap<AccountId, Account>,
    /// Unique index: normalised phone -> account.
    phones: DashMap<String, AccountId>,
    entries: DashMap<EntryId, LedgerEntry>,
    /// Unique index: idempotency key -> entry.
    keys: DashMap<IdempotencyKey, EntryId>,
    by_reference: DashMap<String, Vec<EntryId>>,
    by_account: DashMap<AccountId, Vec<EntryId>>,
    leads: DashMap<LeadId, Lead>,
    faults: Faults,
}

impl State {
    /// Simulated round trip to the backend.
    async fn io(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(())
    }

    /// Runs `f` against a consistent view that no commit can tear.
    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let _gate = self.gate.read();
        f(self)
    }

    fn pending_ids(&self, reference: &str) -> HashSet<EntryId> {
        self.by_reference
            .get(reference)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.entries
                            .get(*id)
                            .is_some_and(|e| e.status == EntryStatus::Pending)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_commit_failure(&self) -> bool {
        self.faults
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Thread-safe in-memory store.
///
/// Cloning is cheap and yields a handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` commits fail after validation, before applying anything.
    pub fn fail_next_commits(&self, count: u32) {
        self.state.faults.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Adds `latency` to every backend round trip.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.faults.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn entry_count(&self) -> usize {
        self.state.read(|s| s.entries.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.state.io().await?;
        Ok(Box::new(MemoryUnit::new(Arc::clone(&self.state))))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| s.accounts.get(&id).map(|a| a.clone())))
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.state.io().await?;
        let mut accounts: Vec<Account> = self
            .state
            .read(|s| s.accounts.iter().map(|a| a.value().clone()).collect());
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn account_by_phone(&self, phone: &str) -> Result<Option<Account>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| {
            s.phones
                .get(phone)
                .and_then(|id| s.accounts.get(id.value()).map(|a| a.clone()))
        }))
    }

    async fn entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| s.entries.get(&id).map(|e| e.clone())))
    }

    async fn entry_by_key(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| {
            s.keys
                .get(key)
                .and_then(|id| s.entries.get(id.value()).map(|e| e.clone()))
        }))
    }

    async fn statement(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| {
            s.by_account
                .get(&account)
                .map(|ids| {
                    ids.iter()
                        .rev()
                        .skip(offset)
                        .take(limit)
                        .filter_map(|id| s.entries.get(id).map(|e| e.clone()))
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn entries_for_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| {
            s.by_reference
                .get(reference)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| s.entries.get(id).map(|e| e.clone()))
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        self.state.io().await?;
        Ok(self.state.read(|s| s.leads.get(id).map(|l| l.clone())))
    }
}

/// Unit of work over a [`MemoryStore`].
///
/// Remembers the version of everything it read so the commit can detect
/// concurrent modification.
struct MemoryUnit {
    state: Arc<State>,
    read_accounts: HashMap<AccountId, Option<u64>>,
    read_phones: HashMap<String, Option<AccountId>>,
    absent_keys: HashSet<IdempotencyKey>,
    read_entries: HashMap<EntryId, u64>,
    /// Pending entry ids seen per scanned reference.
    scanned: HashMap<String, HashSet<EntryId>>,
    read_leads: HashMap<LeadId, Option<u64>>,
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
    leads: HashMap<LeadId, Lead>,
}

impl MemoryUnit {
    fn new(state: Arc<State>) -> Self {
        MemoryUnit {
            state,
            read_accounts: HashMap::new(),
            read_phones: HashMap::new(),
            absent_keys: HashSet::new(),
            read_entries: HashMap::new(),
            scanned: HashMap::new(),
            read_leads: HashMap::new(),
            accounts: HashMap::new(),
            entries: Vec::new(),
            leads: HashMap::new(),
        }
    }

    fn staged_entry(&self, id: EntryId) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn commit_now(self) -> Result<(), StoreError> {
        let state = Arc::clone(&self.state);
        let _gate = state.gate.write();
        self.validate(&state)?;
        if state.take_commit_failure() {
            return Err(StoreError::Unavailable);
        }
        self.apply(&state);
        Ok(())
    }

    fn validate(&self, s: &State) -> Result<(), StoreError> {
        for (id, version) in &self.read_accounts {
            if s.accounts.get(id).map(|a| a.version) != *version {
                return Err(StoreError::Conflict);
            }
        }
        for (phone, owner) in &self.read_phones {
            if s.phones.get(phone).map(|id| *id) != *owner {
                return Err(StoreError::Conflict);
            }
        }
        if self.absent_keys.iter().any(|key| s.keys.contains_key(key)) {
            return Err(StoreError::Conflict);
        }
        for (id, version) in &self.read_entries {
            if s.entries.get(id).map(|e| e.version) != Some(*version) {
                return Err(StoreError::Conflict);
            }
        }
        for (reference, seen) in &self.scanned {
            if s.pending_ids(reference) != *seen {
                return Err(StoreError::Conflict);
            }
        }
        for (id, version) in &self.read_leads {
            if s.leads.get(id).map(|l| l.version) != *version {
                return Err(StoreError::Conflict);
            }
        }

        let mut staged_phones = HashSet::new();
        for account in self.accounts.values() {
            let current = s.accounts.get(&account.id).map(|a| a.version);
            if current.unwrap_or(0) != account.version {
                return Err(StoreError::Conflict);
            }
            if let Some(owner) = s.phones.get(&account.phone)
                && *owner != account.id
            {
                return Err(StoreError::DuplicateKey(account.phone.clone()));
            }
            if !staged_phones.insert(account.phone.as_str()) {
                return Err(StoreError::DuplicateKey(account.phone.clone()));
            }
        }

        let mut staged_keys = HashSet::new();
        for entry in &self.entries {
            match s.entries.get(&entry.id) {
                Some(current) if current.version != entry.version => {
                    return Err(StoreError::Conflict);
                }
                Some(_) => {}
                None => {
                    if s.keys.contains_key(&entry.idempotency_key)
                        || !staged_keys.insert(&entry.idempotency_key)
                    {
                        return Err(StoreError::DuplicateKey(
                            entry.idempotency_key.to_string(),
                        ));
                    }
                }
            }
        }

        for lead in self.leads.values() {
            let current = s.leads.get(&lead.id).map(|l| l.version);
            if current.unwrap_or(0) != lead.version {
                return Err(StoreError::Conflict);
            }
        }
        Ok(())
    }

    fn apply(self, s: &State) {
        for (_, mut account) in self.accounts {
            let previous_phone = s.accounts.get(&account.id).map(|a| a.phone.clone());
            if let Some(previous) = previous_phone
                && previous != account.phone
            {
                s.phones.remove(&previous);
            }
            account.version += 1;
            s.phones.insert(account.phone.clone(), account.id);
            s.accounts.insert(account.id, account);
        }

        for mut entry in self.entries {
            let is_new = !s.entries.contains_key(&entry.id);
            entry.version += 1;
            if is_new {
                s.keys.insert(entry.idempotency_key.clone(), entry.id);
                s.by_reference
                    .entry(entry.reference.clone())
                    .or_default()
                    .push(entry.id);
                s.by_account.entry(entry.account_id).or_default().push(entry.id);
            }
            s.entries.insert(entry.id, entry);
        }

        for (_, mut lead) in self.leads {
            lead.version += 1;
            s.leads.insert(lead.id.clone(), lead);
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        if let Some(staged) = self.accounts.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.state.io().await?;
        let current = self.state.read(|s| s.accounts.get(&id).map(|a| a.clone()));
        self.read_accounts
            .entry(id)
            .or_insert(current.as_ref().map(|a| a.version));
        Ok(current)
    }

    async fn account_by_phone(&mut self, phone: &str) -> Result<Option<Account>, StoreError> {
        if let Some(staged) = self.accounts.values().find(|a| a.phone == phone) {
            return Ok(Some(staged.clone()));
        }
        self.state.io().await?;
        let (owner, current) = self.state.read(|s| {
            let owner = s.phones.get(phone).map(|id| *id);
            let current = owner.and_then(|id| s.accounts.get(&id).map(|a| a.clone()));
            (owner, current)
        });
        self.read_phones.entry(phone.to_owned()).or_insert(owner);
        if let Some(account) = &current {
            if let Some(staged) = self.accounts.get(&account.id) {
                return Ok(Some(staged.clone()));
            }
            self.read_accounts
                .entry(account.id)
                .or_insert(Some(account.version));
        }
        Ok(current)
    }

    async fn entry(&mut self, id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        if let Some(staged) = self.staged_entry(id) {
            return Ok(Some(staged.clone()));
        }
        self.state.io().await?;
        let current = self.state.read(|s| s.entries.get(&id).map(|e| e.clone()));
        if let Some(entry) = &current {
            self.read_entries.entry(entry.id).or_insert(entry.version);
        }
        Ok(current)
    }

    async fn key_exists(&mut self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        if self.entries.iter().any(|e| &e.idempotency_key == key) {
            return Ok(true);
        }
        self.state.io().await?;
        let exists = self.state.read(|s| s.keys.contains_key(key));
        if !exists {
            self.absent_keys.insert(key.clone());
        }
        Ok(exists)
    }

    async fn pending_for_reference(
        &mut self,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.state.io().await?;
        let stored: Vec<LedgerEntry> = self.state.read(|s| {
            s.by_reference
                .get(reference)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| s.entries.get(id).map(|e| e.clone()))
                        .filter(|e| e.status == EntryStatus::Pending)
                        .collect()
                })
                .unwrap_or_default()
        });

        self.scanned
            .entry(reference.to_owned())
            .or_insert_with(|| stored.iter().map(|e| e.id).collect());
        for entry in &stored {
            self.read_entries.entry(entry.id).or_insert(entry.version);
        }

        let mut pending = Vec::with_capacity(stored.len());
        for entry in stored {
            match self.staged_entry(entry.id) {
                Some(staged) if staged.status == EntryStatus::Pending => {
                    pending.push(staged.clone())
                }
                Some(_) => {}
                None => pending.push(entry),
            }
        }
        for staged in &self.entries {
            let unseen = !pending.iter().any(|e| e.id == staged.id);
            if unseen && staged.reference == reference && staged.status == EntryStatus::Pending {
                let stored = self.read_entries.contains_key(&staged.id);
                if !stored {
                    pending.push(staged.clone());
                }
            }
        }
        Ok(pending)
    }

    async fn lead(&mut self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        if let Some(staged) = self.leads.get(id) {
            return Ok(Some(staged.clone()));
        }
        self.state.io().await?;
        let current = self.state.read(|s| s.leads.get(id).map(|l| l.clone()));
        self.read_leads
            .entry(id.clone())
            .or_insert(current.as_ref().map(|l| l.version));
        Ok(current)
    }

    fn put_account(&mut self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    fn put_entry(&mut self, entry: LedgerEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(staged) => *staged = entry,
            None => self.entries.push(entry),
        }
    }

    fn put_lead(&mut self, lead: Lead) {
        self.leads.insert(lead.id.clone(), lead);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.state.io().await?;
        (*self).commit_now()
    }
}
