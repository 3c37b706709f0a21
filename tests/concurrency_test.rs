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

//! Concurrency tests.
//!
//! Many tasks hammer the same accounts, keys and leads on a multi-threaded
//! runtime. Optimistic commits must serialise them without losing updates,
//! overdrawing, or applying a key twice.

mod common;

use common::{Ledger, request};
use futures::future::join_all;
use referral_ledger::{
    AccountId, EntryKind, LeadId, LeadStatusChange, LedgerError, Role, SettlementOutcome, Settings,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn contended() -> Arc<Ledger> {
    let mut settings = Settings::default();
    settings.engine.max_conflict_retries = 10_000;
    settings.engine.commit_timeout_ms = 30_000;
    Arc::new(Ledger::with_settings(settings))
}

async fn credit_all(ledger: &Arc<Ledger>, account: AccountId, count: usize, prefix: &str) {
    let tasks = (0..count).map(|i| {
        let ledger = Arc::clone(ledger);
        let key = format!("{prefix}-{i}");
        tokio::spawn(async move {
            ledger
                .record(account, EntryKind::Credit, dec!(10), &key)
                .await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_credits_lose_no_updates() {
    let ledger = contended();
    let account = ledger.open("9000000001", Role::User).await;

    credit_all(&ledger, account.id, 50, "k").await;

    let account = ledger.account(account.id).await;
    assert_eq!(account.balance, 500);
    assert_eq!(account.lifetime_earned, 500);
    assert_eq!(ledger.store.entry_count(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_never_overdraw() {
    let ledger = contended();
    let account = ledger.open("9000000001", Role::User).await;
    ledger
        .record(account.id, EntryKind::Credit, dec!(100), "seed")
        .await
        .unwrap();

    let tasks = (0..30).map(|i| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .record(account.id, EntryKind::Debit, dec!(10), &format!("d-{i}"))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 10);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::InsufficientFunds { .. }))
    );

    let account = ledger.account(account.id).await;
    assert_eq!(account.balance, 0);
    assert_eq!(account.lifetime_withdrawn, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_same_key_applies_once() {
    let ledger = contended();
    let account = ledger.open("9000000001", Role::User).await;

    let tasks = (0..20).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .engine
                .record_transaction(
                    &ledger.admin,
                    request(account.id, EntryKind::Credit, dec!(10), "same", "manual"),
                )
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == LedgerError::DuplicateSettlement("same".into()))
    );
    assert_eq!(ledger.account(account.id).await.balance, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_accounts_progress_in_parallel() {
    let ledger = contended();
    let mut accounts = Vec::new();
    for i in 0..10 {
        accounts.push(ledger.open(&format!("90000000{i:02}"), Role::User).await.id);
    }

    join_all(accounts.iter().enumerate().map(|(i, id)| {
        let ledger = Arc::clone(&ledger);
        let prefix = format!("a{i}");
        let id = *id;
        async move { credit_all(&ledger, id, 20, &prefix).await }
    }))
    .await;

    for id in accounts {
        assert_eq!(ledger.account(id).await.balance, 200);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_deliveries_settle_once() {
    let ledger = contended();
    let owner = ledger.open("9000000001", Role::User).await;
    ledger
        .coordinator
        .register_lead(&ledger.admin, LeadId::from("L-1"), owner.id)
        .await
        .unwrap();

    let tasks = (0..10).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .coordinator
                .handle(LeadStatusChange {
                    lead_id: LeadId::from("L-1"),
                    status: "Shoot Completed".to_owned(),
                    amount: Some(dec!(1000)),
                    payment_id: Some("pay-1".into()),
                    customer: None,
                    caller: ledger.admin,
                })
                .await
        })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, SettlementOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);

    let owner = ledger.account(owner.id).await;
    assert_eq!(owner.balance, 100);
    assert_eq!(owner.total_leads_converted, 1);
}
