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

//! Transaction processing engine.
//!
//! The [`Engine`] is the only component that writes to a [`Store`]. Every
//! operation runs inside one unit of work: the account effect and the ledger
//! entry are committed together or not at all.
//!
//! # Transaction Processing
//!
//! - **CREDIT / POINTS_CREDIT**: Add to balance or points and to the matching
//!   lifetime-earned counter.
//! - **DEBIT / WITHDRAWAL / POINTS_DEBIT**: Require sufficient funds, subtract,
//!   and add to the matching lifetime-withdrawn counter.
//! - **PENDING** entries are only recorded; their effect is applied when the
//!   lead they reference settles.
//!
//! # Concurrency
//!
//! Units of work are optimistic. A unit that loses a race on an account is
//! retried from scratch with fresh reads, up to
//! [`EngineSettings::max_conflict_retries`] times, and the whole operation is
//! bounded by [`EngineSettings::commit_timeout`]. Nothing is cached between
//! calls.

use crate::account::{Account, NewAccount, PhoneFormat};
use crate::base::{AccountId, Principal, Role, units_from_decimal};
use crate::config::{EngineSettings, Settings};
use crate::error::{LedgerError, StoreError, ValidationError};
use crate::notify::{Dispatcher, Notification};
use crate::store::Store;
use crate::transaction::{Capabilities, EntryRequest, EntryStatus, LedgerEntry};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Instant, timeout_at};
use tracing::Instrument;

/// Ledger engine over a shared [`Store`].
///
/// # Invariants
///
/// - Balances and points never go below zero.
/// - An idempotency key is accepted at most once.
/// - A suspended account accepts no new entries.
pub struct Engine {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    settings: EngineSettings,
    phones: PhoneFormat,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, settings: &Settings) -> Self {
        Engine {
            store,
            dispatcher: Dispatcher::default(),
            settings: settings.engine.clone(),
            phones: PhoneFormat::from(&settings.settlement),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn phones(&self) -> &PhoneFormat {
        &self.phones
    }

    /// Records one ledger entry against an account.
    ///
    /// With [`EntryStatus::Success`] the account effect is applied in the same
    /// unit of work; with [`EntryStatus::Pending`] only the entry is stored.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - Amount below one unit, blank field,
    ///   `CANCELLED` status, or a kind the caller's role may not record.
    /// - [`LedgerError::AccountInactive`] - Caller or target is suspended.
    /// - [`LedgerError::AccountNotFound`] - Target does not exist.
    /// - [`LedgerError::DuplicateSettlement`] - Idempotency key already used.
    /// - [`LedgerError::InsufficientFunds`] - Outflow exceeds balance or points.
    /// - [`LedgerError::Persistence`] - Store failure; nothing was applied.
    pub async fn record_transaction(
        &self,
        principal: &Principal,
        request: EntryRequest,
    ) -> Result<LedgerEntry, LedgerError> {
        let amount = Self::validate_request(principal, &request)?;
        let span = tracing::info_span!(
            "record_transaction",
            account = %request.account_id,
            kind = %request.kind,
            key = %request.idempotency_key,
        );

        let request = &request;
        async {
            let entry = self
                .run_unit("record_transaction", move || {
                    self.try_record(principal, request, amount)
                })
                .await?;

            tracing::info!(entry = %entry.id, amount, status = %entry.status, "entry recorded");
            if entry.status == EntryStatus::Success {
                self.dispatcher.dispatch(Notification::Transaction {
                    account: entry.account_id,
                    entry: entry.id,
                    kind: entry.kind,
                    amount: entry.amount,
                });
            }
            Ok(entry)
        }
        .instrument(span)
        .await
    }

    fn validate_request(principal: &Principal, request: &EntryRequest) -> Result<u64, LedgerError> {
        if !principal.active {
            return Err(LedgerError::AccountInactive(principal.account_id));
        }
        if !Capabilities::permits(principal.role, request.kind) {
            return Err(ValidationError::KindNotAllowed {
                role: principal.role.to_string(),
                kind: request.kind,
            }
            .into());
        }
        if request.status == EntryStatus::Cancelled {
            return Err(ValidationError::InvalidStatus(request.status.to_string()).into());
        }
        if request.idempotency_key.is_blank() {
            return Err(ValidationError::BlankField("idempotency_key").into());
        }
        if request.reference.trim().is_empty() {
            return Err(ValidationError::BlankField("reference").into());
        }
        if request.comment.trim().is_empty() {
            return Err(ValidationError::BlankField("comment").into());
        }
        let amount = units_from_decimal(request.amount);
        if amount < 1 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        Ok(amount)
    }

    async fn try_record(
        &self,
        principal: &Principal,
        request: &EntryRequest,
        amount: u64,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut unit = self.store.begin().await?;

        if unit.key_exists(&request.idempotency_key).await? {
            return Err(LedgerError::DuplicateSettlement(
                request.idempotency_key.clone(),
            ));
        }

        let mut account = unit
            .account(request.account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(request.account_id))?;
        if !account.active {
            return Err(LedgerError::AccountInactive(account.id));
        }

        let entry = LedgerEntry::new(
            account.id,
            principal.account_id,
            request.kind,
            amount,
            request.reference.trim(),
            request.idempotency_key.clone(),
            request.comment.trim(),
            request.status,
        );

        if entry.status == EntryStatus::Success {
            account.apply_effect(entry.kind, entry.amount)?;
            unit.put_account(account);
        }
        unit.put_entry(entry.clone());

        unit.commit().await.map_err(|e| match e {
            StoreError::DuplicateKey(_) => {
                LedgerError::DuplicateSettlement(request.idempotency_key.clone())
            }
            other => other.into(),
        })?;
        Ok(entry)
    }

    /// Opens a new active account. Admin only.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NotPermitted`] - Caller is not an admin.
    /// - [`ValidationError::DuplicateContact`] - Phone already registered.
    pub async fn open_account(
        &self,
        principal: &Principal,
        fields: NewAccount,
    ) -> Result<Account, LedgerError> {
        Self::require_admin(principal)?;
        if fields.name.trim().is_empty() {
            return Err(ValidationError::BlankField("name").into());
        }
        let phone = self.phones.normalize(&fields.phone);
        if phone.is_empty() {
            return Err(ValidationError::BlankField("phone").into());
        }
        let fields = &NewAccount { phone, ..fields };

        let account = self
            .run_unit("open_account", move || async move {
                let mut unit = self.store.begin().await?;
                if unit.account_by_phone(&fields.phone).await?.is_some() {
                    return Err(ValidationError::DuplicateContact(fields.phone.clone()).into());
                }
                let account = Account::create(fields.clone());
                unit.put_account(account.clone());
                unit.commit().await.map_err(|e| match e {
                    StoreError::DuplicateKey(phone) => {
                        LedgerError::from(ValidationError::DuplicateContact(phone))
                    }
                    other => LedgerError::from(other),
                })?;
                Ok::<_, LedgerError>(account)
            })
            .await?;

        tracing::info!(account = %account.id, role = %account.role, "account opened");
        Ok(account)
    }

    /// Suspends (`active == false`) or reinstates an account. Admin only.
    pub async fn set_active(
        &self,
        principal: &Principal,
        account_id: AccountId,
        active: bool,
    ) -> Result<Account, LedgerError> {
        Self::require_admin(principal)?;

        let account = self
            .run_unit("set_active", move || async move {
                let mut unit = self.store.begin().await?;
                let mut account = unit
                    .account(account_id)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(account_id))?;
                account.active = active;
                unit.put_account(account.clone());
                unit.commit().await?;
                Ok::<_, LedgerError>(account)
            })
            .await?;

        tracing::info!(account = %account_id, active, "account status changed");
        Ok(account)
    }

    /// Fresh read of an account.
    pub async fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Looks an account up by its contact phone, normalised first.
    pub async fn account_by_phone(&self, phone: &str) -> Result<Option<Account>, LedgerError> {
        let phone = self.phones.normalize(phone);
        Ok(self.store.account_by_phone(&phone).await?)
    }

    /// One page of the account's entries, newest first. Pages start at zero.
    pub async fn statement(
        &self,
        account_id: AccountId,
        page: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let size = self.settings.statement_page_size.max(1);
        self.account(account_id).await?;
        Ok(self
            .store
            .statement(account_id, page.saturating_mul(size), size)
            .await?)
    }

    fn require_admin(principal: &Principal) -> Result<(), LedgerError> {
        if !principal.active {
            return Err(LedgerError::AccountInactive(principal.account_id));
        }
        if principal.role != Role::Admin {
            return Err(ValidationError::NotPermitted.into());
        }
        Ok(())
    }

    /// Runs `attempt` until it commits, fails for a reason other than a
    /// conflict, runs out of retries, or passes the commit deadline.
    ///
    /// Each attempt must open its own unit of work. An attempt cut off by the
    /// deadline drops its unit uncommitted.
    pub(crate) async fn run_unit<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let deadline = Instant::now() + self.settings.commit_timeout();
        let mut retries = 0;
        loop {
            let Ok(outcome) = timeout_at(deadline, attempt()).await else {
                tracing::warn!(operation, retries, "unit of work timed out");
                return Err(StoreError::Timeout.into());
            };
            match outcome {
                Err(LedgerError::Persistence(StoreError::Conflict))
                    if retries < self.settings.max_conflict_retries =>
                {
                    retries += 1;
                    tracing::debug!(operation, retries, "unit of work conflicted; retrying");
                    tokio::task::yield_now().await;
                }
                Err(error) => {
                    tracing::debug!(operation, %error, "unit of work rejected");
                    return Err(error);
                }
                ok => return ok,
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("phones", &self.phones)
            .finish_non_exhaustive()
    }
}
