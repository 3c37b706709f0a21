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

//! Best-effort notifications.
//!
//! The ledger never waits for a notification: [`Dispatcher::dispatch`] hands
//! it to a spawned task and returns. Delivery failures are logged and never
//! reach the caller of a committed mutation.

use crate::base::{AccountId, EntryId, LeadId};
use crate::transaction::EntryKind;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A ledger entry was applied to the account holder's balance or points.
    Transaction {
        account: AccountId,
        entry: EntryId,
        kind: EntryKind,
        amount: u64,
    },
    /// A lead that already carries a commission reported a different amount.
    /// Needs a manual correction by an administrator.
    CommissionDispute {
        lead: LeadId,
        account: AccountId,
        recorded: u64,
        requested: u64,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound delivery channel (email, WhatsApp, ...).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Transaction {
                account,
                entry,
                kind,
                amount,
            } => tracing::info!(%account, %entry, %kind, amount, "transaction notification"),
            Notification::CommissionDispute {
                lead,
                account,
                recorded,
                requested,
            } => tracing::warn!(
                %lead,
                %account,
                recorded,
                requested,
                "commission already recorded for lead with a different amount"
            ),
        }
        Ok(())
    }
}

/// Fire-and-forget front of a [`Notifier`].
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Dispatcher { notifier }
    }

    pub fn dispatch(&self, notification: Notification) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(?notification, "no async runtime; notification dropped");
            return;
        };
        let notifier = Arc::clone(&self.notifier);
        handle.spawn(async move {
            if let Err(error) = notifier.notify(notification.clone()).await {
                tracing::warn!(%error, ?notification, "notification failed");
            }
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new(Arc::new(TracingNotifier))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
