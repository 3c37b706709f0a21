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

//! # Referral Ledger
//!
//! This library provides the ledger behind a referral programme: it keeps
//! monetary balances and loyalty points for every account, records each change
//! as an append-only ledger entry, and settles the entries tied to a lead when
//! the CRM reports that the lead was won or lost.
//!
//! ## Core Components
//!
//! - [`Engine`]: Records ledger entries and applies their account effects atomically
//! - [`Coordinator`]: Settles a lead's pending entries and accrues commission and loyalty points
//! - [`Account`]: Balance and points aggregate that never goes negative
//! - [`CommissionCalculator`]: Tier-dependent commission and loyalty accrual
//! - [`Store`] / [`UnitOfWork`]: Transactional storage seam, with [`MemoryStore`] as backend
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use referral_ledger::{
//!     AccountId, Engine, EntryKind, EntryRequest, EntryStatus, MemoryStore, NewAccount,
//!     Principal, Role, Settings,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), referral_ledger::LedgerError> {
//! let engine = Engine::new(Arc::new(MemoryStore::new()), &Settings::default());
//! let admin = Principal::new(AccountId::new(), Role::Admin);
//!
//! let account = engine
//!     .open_account(&admin, NewAccount::new("Asha", "9000000001", Role::User))
//!     .await?;
//!
//! engine
//!     .record_transaction(
//!         &admin,
//!         EntryRequest {
//!             account_id: account.id,
//!             kind: EntryKind::Credit,
//!             amount: dec!(250.75),
//!             reference: "manual".into(),
//!             idempotency_key: "bonus-1".into(),
//!             comment: "welcome bonus".into(),
//!             status: EntryStatus::Success,
//!         },
//!     )
//!     .await?;
//!
//! assert_eq!(engine.account(account.id).await?.balance, 250);
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! Operations on different accounts run in parallel. Operations on the same
//! account are linearised by optimistic concurrency in the store, and retried
//! transparently when they lose a race.

pub mod account;
mod base;
pub mod commission;
pub mod config;
mod engine;
pub mod error;
pub mod lead;
pub mod notify;
pub mod settlement;
pub mod store;
mod transaction;

pub use account::{Account, NewAccount, PhoneFormat};
pub use base::{AccountId, EntryId, IdempotencyKey, LeadId, Principal, Role, units_from_decimal};
pub use commission::{Accrual, CommissionCalculator, Tier};
pub use config::Settings;
pub use engine::Engine;
pub use error::{LedgerError, StoreError, ValidationError};
pub use lead::{Lead, LeadOutcome, StatusMap};
pub use notify::{Dispatcher, Notification, Notifier, NotifyError, TracingNotifier};
pub use settlement::{
    CommissionDispute, Coordinator, CustomerContact, LeadStatusChange, SettlementOutcome,
    SettlementReport,
};
pub use store::{MemoryStore, Store, UnitOfWork};
pub use transaction::{Capabilities, EntryKind, EntryRequest, EntryStatus, LedgerEntry};
