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

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use referral_ledger::{
    Account, AccountId, Coordinator, Dispatcher, Engine, EntryKind, EntryRequest, EntryStatus,
    LedgerEntry, LedgerError, MemoryStore, NewAccount, Notification, Notifier, NotifyError,
    Principal, Role, Settings,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Forwards every notification to a channel.
pub struct Recorder(mpsc::UnboundedSender<Notification>);

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.0
            .send(notification)
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

pub struct Ledger {
    pub store: MemoryStore,
    pub engine: Arc<Engine>,
    pub coordinator: Coordinator,
    pub admin: Principal,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Ledger whose loyalty accruals are recorded as created by a system principal.
    pub fn with_loyalty() -> Self {
        let mut settings = Settings::default();
        settings.settlement.loyalty_source = Some(AccountId::new());
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(
            Engine::new(Arc::new(store.clone()), &settings)
                .with_dispatcher(Dispatcher::new(Arc::new(Recorder(tx)))),
        );
        Ledger {
            store,
            coordinator: Coordinator::new(Arc::clone(&engine), &settings),
            engine,
            admin: Principal::new(AccountId::new(), Role::Admin),
            notifications: rx,
        }
    }

    pub async fn open(&self, phone: &str, role: Role) -> Account {
        self.engine
            .open_account(&self.admin, NewAccount::new("Test", phone, role))
            .await
            .unwrap()
    }

    pub async fn record(
        &self,
        account: AccountId,
        kind: EntryKind,
        amount: Decimal,
        key: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.engine
            .record_transaction(&self.admin, request(account, kind, amount, key, "manual"))
            .await
    }

    pub async fn account(&self, id: AccountId) -> Account {
        self.engine.account(id).await.unwrap()
    }

    /// Next notification, failing the test if none arrives within a second.
    pub async fn next_notification(&mut self) -> Notification {
        tokio::time::timeout(Duration::from_secs(1), self.notifications.recv())
            .await
            .expect("notification not delivered")
            .expect("dispatcher closed")
    }

    /// Waits briefly and asserts nothing else was dispatched.
    pub async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.notifications.recv()).await;
        assert!(next.is_err(), "unexpected notification: {next:?}");
    }
}

pub fn request(
    account: AccountId,
    kind: EntryKind,
    amount: Decimal,
    key: &str,
    reference: &str,
) -> EntryRequest {
    EntryRequest {
        account_id: account,
        kind,
        amount,
        reference: reference.to_owned(),
        idempotency_key: key.into(),
        comment: "test entry".to_owned(),
        status: EntryStatus::Success,
    }
}
