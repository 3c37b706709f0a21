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

//! Engine public API integration tests.

mod common;

use common::{Ledger, request};
use referral_ledger::{
    AccountId, EntryKind, EntryStatus, LedgerError, NewAccount, Notification, Principal, Role,
    Settings, Store, StoreError, ValidationError,
};
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn credit_floors_amount_and_tracks_lifetime() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    let entry = ledger
        .record(account.id, EntryKind::Credit, dec!(250.75), "k-1")
        .await
        .unwrap();

    assert_eq!(entry.amount, 250);
    assert_eq!(entry.status, EntryStatus::Success);
    assert!(entry.settled_at.is_some());

    let account = ledger.account(account.id).await;
    assert_eq!(account.balance, 250);
    assert_eq!(account.lifetime_earned, 250);
    assert_eq!(account.lifetime_withdrawn, 0);
}

#[tokio::test]
async fn debit_beyond_balance_is_rejected() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;
    ledger
        .record(account.id, EntryKind::Credit, dec!(500), "k-1")
        .await
        .unwrap();

    let sales = Principal::new(AccountId::new(), Role::Sales);
    let result = ledger
        .engine
        .record_transaction(
            &sales,
            request(account.id, EntryKind::Debit, dec!(600), "k-2", "manual"),
        )
        .await;

    assert_eq!(
        result,
        Err(LedgerError::InsufficientFunds {
            account: account.id,
            kind: EntryKind::Debit,
            requested: 600,
            available: 500,
        })
    );
    let after = ledger.account(account.id).await;
    assert_eq!(after.balance, 500);
    assert_eq!(after.lifetime_withdrawn, 0);
    assert_eq!(ledger.store.entry_count(), 1);
}

#[tokio::test]
async fn withdrawal_reduces_balance() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;
    ledger
        .record(account.id, EntryKind::Credit, dec!(500), "k-1")
        .await
        .unwrap();
    ledger
        .record(account.id, EntryKind::Withdrawal, dec!(200), "k-2")
        .await
        .unwrap();
    ledger
        .record(account.id, EntryKind::Debit, dec!(300), "k-3")
        .await
        .unwrap();

    let account = ledger.account(account.id).await;
    assert_eq!(account.balance, 0);
    assert_eq!(account.lifetime_earned, 500);
    assert_eq!(account.lifetime_withdrawn, 500);
}

#[tokio::test]
async fn points_are_separate_from_balance() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;
    ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await
        .unwrap();
    ledger
        .record(account.id, EntryKind::PointsCredit, dec!(40), "k-2")
        .await
        .unwrap();
    ledger
        .record(account.id, EntryKind::PointsDebit, dec!(15), "k-3")
        .await
        .unwrap();

    let result = ledger
        .record(account.id, EntryKind::PointsDebit, dec!(50), "k-4")
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds { available: 25, .. })
    ));

    let account = ledger.account(account.id).await;
    assert_eq!(account.balance, 100);
    assert_eq!(account.points, 25);
    assert_eq!(account.lifetime_points_earned, 40);
    assert_eq!(account.lifetime_points_withdrawn, 15);
}

#[tokio::test]
async fn duplicate_idempotency_key_is_rejected() {
    let ledger = Ledger::new();
    let first = ledger.open("9000000001", Role::User).await;
    let second = ledger.open("9000000002", Role::User).await;
    ledger
        .record(first.id, EntryKind::Credit, dec!(100), "k-1")
        .await
        .unwrap();

    let again = ledger
        .record(first.id, EntryKind::Credit, dec!(100), "k-1")
        .await;
    assert_eq!(again, Err(LedgerError::DuplicateSettlement("k-1".into())));

    let elsewhere = ledger
        .record(second.id, EntryKind::Credit, dec!(100), "k-1")
        .await;
    assert_eq!(elsewhere, Err(LedgerError::DuplicateSettlement("k-1".into())));

    assert_eq!(ledger.account(first.id).await.balance, 100);
    assert_eq!(ledger.account(second.id).await.balance, 0);
}

#[tokio::test]
async fn capabilities_restrict_kinds_by_role() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;
    ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await
        .unwrap();

    let sales = Principal::new(AccountId::new(), Role::Sales);
    let credit = ledger
        .engine
        .record_transaction(
            &sales,
            request(account.id, EntryKind::Credit, dec!(10), "k-2", "manual"),
        )
        .await;
    assert!(matches!(
        credit,
        Err(LedgerError::Validation(ValidationError::KindNotAllowed { .. }))
    ));

    let debit = ledger
        .engine
        .record_transaction(
            &sales,
            request(account.id, EntryKind::Debit, dec!(10), "k-3", "manual"),
        )
        .await
        .unwrap();
    assert_eq!(debit.created_by, sales.account_id);

    for role in [Role::User, Role::GoldUser] {
        let caller = Principal::new(account.id, role);
        let result = ledger
            .engine
            .record_transaction(
                &caller,
                request(account.id, EntryKind::Withdrawal, dec!(10), "k-4", "manual"),
            )
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Validation(ValidationError::KindNotAllowed { .. }))
        ));
    }

    assert_eq!(ledger.account(account.id).await.balance, 90);
}

#[tokio::test]
async fn suspended_accounts_are_rejected() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    let mut suspended_caller = ledger.admin;
    suspended_caller.active = false;
    let result = ledger
        .engine
        .record_transaction(
            &suspended_caller,
            request(account.id, EntryKind::Credit, dec!(10), "k-1", "manual"),
        )
        .await;
    assert_eq!(result, Err(LedgerError::AccountInactive(ledger.admin.account_id)));

    ledger
        .engine
        .set_active(&ledger.admin, account.id, false)
        .await
        .unwrap();
    let result = ledger
        .record(account.id, EntryKind::Credit, dec!(10), "k-2")
        .await;
    assert_eq!(result, Err(LedgerError::AccountInactive(account.id)));

    ledger
        .engine
        .set_active(&ledger.admin, account.id, true)
        .await
        .unwrap();
    ledger
        .record(account.id, EntryKind::Credit, dec!(10), "k-2")
        .await
        .unwrap();
    assert_eq!(ledger.account(account.id).await.balance, 10);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    let below_one = ledger
        .record(account.id, EntryKind::Credit, dec!(0.99), "k-1")
        .await;
    assert_eq!(
        below_one,
        Err(LedgerError::Validation(ValidationError::NonPositiveAmount))
    );

    let negative = ledger
        .record(account.id, EntryKind::Credit, dec!(-5), "k-1")
        .await;
    assert_eq!(
        negative,
        Err(LedgerError::Validation(ValidationError::NonPositiveAmount))
    );

    let blank_key = ledger
        .record(account.id, EntryKind::Credit, dec!(5), "  ")
        .await;
    assert_eq!(
        blank_key,
        Err(LedgerError::Validation(ValidationError::BlankField(
            "idempotency_key"
        )))
    );

    let mut cancelled = request(account.id, EntryKind::Credit, dec!(5), "k-2", "manual");
    cancelled.status = EntryStatus::Cancelled;
    let result = ledger
        .engine
        .record_transaction(&ledger.admin, cancelled)
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::Validation(ValidationError::InvalidStatus(_)))
    ));

    let missing = AccountId::new();
    let result = ledger
        .record(missing, EntryKind::Credit, dec!(5), "k-3")
        .await;
    assert_eq!(result, Err(LedgerError::AccountNotFound(missing)));

    assert_eq!(ledger.store.entry_count(), 0);
}

#[tokio::test]
async fn pending_entry_has_no_effect() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    let mut pending = request(account.id, EntryKind::Credit, dec!(75), "k-1", "L-1");
    pending.status = EntryStatus::Pending;
    let entry = ledger
        .engine
        .record_transaction(&ledger.admin, pending)
        .await
        .unwrap();

    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.settled_at.is_none());
    assert_eq!(ledger.account(account.id).await.balance, 0);

    let stored = ledger.engine.store().entry(entry.id).await.unwrap().unwrap();
    assert_eq!(stored.reference, "L-1");
    assert_eq!(stored.status, EntryStatus::Pending);
}

#[tokio::test]
async fn failed_commit_applies_nothing() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    ledger.store.fail_next_commits(1);
    let result = ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await;
    assert_eq!(result, Err(LedgerError::Persistence(StoreError::Unavailable)));
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(ledger.account(account.id).await.balance, 0);
    assert_eq!(ledger.store.entry_count(), 0);

    ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await
        .unwrap();
    assert_eq!(ledger.account(account.id).await.balance, 100);
}

#[tokio::test]
async fn unavailable_store_is_reported() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    ledger.store.set_unavailable(true);
    let result = ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await;
    assert_eq!(result, Err(LedgerError::Persistence(StoreError::Unavailable)));

    ledger.store.set_unavailable(false);
    assert_eq!(ledger.account(account.id).await.balance, 0);
}

#[tokio::test]
async fn slow_store_times_out() {
    let mut settings = Settings::default();
    settings.engine.commit_timeout_ms = 20;
    let ledger = Ledger::with_settings(settings);
    let account = ledger.open("9000000001", Role::User).await;

    ledger.store.set_latency(Duration::from_millis(100));
    let result = ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await;
    assert_eq!(result, Err(LedgerError::Persistence(StoreError::Timeout)));

    ledger.store.set_latency(Duration::ZERO);
    assert_eq!(ledger.account(account.id).await.balance, 0);
    assert_eq!(ledger.store.entry_count(), 0);
}

#[tokio::test]
async fn open_account_normalises_phone() {
    let ledger = Ledger::new();
    let account = ledger.open("+91 90000-00001", Role::GoldUser).await;
    assert_eq!(account.phone, "9000000001");
    assert!(account.active);

    let duplicate = ledger
        .engine
        .open_account(
            &ledger.admin,
            NewAccount::new("Other", "9000000001", Role::User),
        )
        .await;
    assert_eq!(
        duplicate,
        Err(LedgerError::Validation(ValidationError::DuplicateContact(
            "9000000001".to_owned()
        )))
    );

    let found = ledger
        .engine
        .account_by_phone("919000000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, account.id);
}

#[tokio::test]
async fn admin_operations_require_admin() {
    let ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;
    let sales = Principal::new(AccountId::new(), Role::Sales);

    let open = ledger
        .engine
        .open_account(&sales, NewAccount::new("Other", "9000000002", Role::User))
        .await;
    assert_eq!(open, Err(LedgerError::Validation(ValidationError::NotPermitted)));

    let suspend = ledger.engine.set_active(&sales, account.id, false).await;
    assert_eq!(
        suspend,
        Err(LedgerError::Validation(ValidationError::NotPermitted))
    );
    assert!(ledger.account(account.id).await.active);
}

#[tokio::test]
async fn statement_pages_newest_first() {
    let mut settings = Settings::default();
    settings.engine.statement_page_size = 2;
    let ledger = Ledger::with_settings(settings);
    let account = ledger.open("9000000001", Role::User).await;
    for (i, amount) in [dec!(10), dec!(20), dec!(30)].into_iter().enumerate() {
        ledger
            .record(account.id, EntryKind::Credit, amount, &format!("k-{i}"))
            .await
            .unwrap();
    }

    let first = ledger.engine.statement(account.id, 0).await.unwrap();
    let amounts: Vec<u64> = first.iter().map(|e| e.amount).collect();
    assert_eq!(amounts, vec![30, 20]);

    let second = ledger.engine.statement(account.id, 1).await.unwrap();
    let amounts: Vec<u64> = second.iter().map(|e| e.amount).collect();
    assert_eq!(amounts, vec![10]);

    assert!(ledger.engine.statement(account.id, 2).await.unwrap().is_empty());

    let missing = AccountId::new();
    assert_eq!(
        ledger.engine.statement(missing, 0).await,
        Err(LedgerError::AccountNotFound(missing))
    );
}

#[tokio::test]
async fn success_dispatches_notification() {
    let mut ledger = Ledger::new();
    let account = ledger.open("9000000001", Role::User).await;

    let entry = ledger
        .record(account.id, EntryKind::Credit, dec!(100), "k-1")
        .await
        .unwrap();
    assert_eq!(
        ledger.next_notification().await,
        Notification::Transaction {
            account: account.id,
            entry: entry.id,
            kind: EntryKind::Credit,
            amount: 100,
        }
    );

    let mut pending = request(account.id, EntryKind::Credit, dec!(5), "k-2", "L-1");
    pending.status = EntryStatus::Pending;
    ledger
        .engine
        .record_transaction(&ledger.admin, pending)
        .await
        .unwrap();
    let _ = ledger
        .record(account.id, EntryKind::Debit, dec!(1000), "k-3")
        .await;
    ledger.assert_quiet().await;
}
