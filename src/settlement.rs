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

//! Lead settlement.
//!
//! The [`Coordinator`] turns CRM lead-status changes into ledger movements:
//!
//! | Outcome | Behavior |
//! |---------|----------|
//! | Open | Records the status; an amount creates a PENDING commission |
//! | Won | Applies every PENDING entry of the lead, credits commission and loyalty points |
//! | Lost | Cancels every PENDING entry of the lead, no account effect |
//!
//! Each change is settled in a single unit of work. Repeat deliveries (same
//! payment id, or a lead that is already won or lost) change nothing and
//! report [`SettlementOutcome::AlreadyProcessed`].

use crate::account::{Account, NewAccount};
use crate::base::{AccountId, IdempotencyKey, LeadId, Principal, Role};
use crate::commission::{CommissionCalculator, Tier};
use crate::config::{SettlementSettings, Settings};
use crate::engine::Engine;
use crate::error::{LedgerError, StoreError, ValidationError};
use crate::lead::{Lead, LeadOutcome, StatusMap};
use crate::notify::Notification;
use crate::store::UnitOfWork;
use crate::transaction::{EntryKind, EntryStatus, LedgerEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

/// End customer of a lead, credited with loyalty points on conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Status change reported by the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadStatusChange {
    pub lead_id: LeadId,
    /// Raw CRM status, resolved through the configured [`StatusMap`].
    pub status: String,
    pub amount: Option<Decimal>,
    pub payment_id: Option<IdempotencyKey>,
    pub customer: Option<CustomerContact>,
    pub caller: Principal,
}

/// What a settlement did, entry by entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub lead: LeadId,
    pub outcome: LeadOutcome,
    /// PENDING entries now SUCCESS.
    pub settled: Vec<LedgerEntry>,
    /// PENDING entries now CANCELLED.
    pub cancelled: Vec<LedgerEntry>,
    /// Commission and loyalty entries created by this change.
    pub created: Vec<LedgerEntry>,
    pub dispute: Option<CommissionDispute>,
}

impl SettlementReport {
    fn new(lead: LeadId, outcome: LeadOutcome) -> Self {
        SettlementReport {
            lead,
            outcome,
            settled: Vec::new(),
            cancelled: Vec::new(),
            created: Vec::new(),
            dispute: None,
        }
    }

    /// Entries whose effect was applied to an account by this settlement.
    pub fn applied(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.settled
            .iter()
            .chain(self.created.iter())
            .filter(|e| e.status == EntryStatus::Success)
    }
}

/// A commission amount that disagrees with the one already on the lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionDispute {
    pub account: AccountId,
    pub recorded: u64,
    pub requested: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied(SettlementReport),
    AlreadyProcessed,
}

/// Lead-settlement coordinator.
#[derive(Debug)]
pub struct Coordinator {
    engine: Arc<Engine>,
    statuses: StatusMap,
    calculator: CommissionCalculator,
    settings: SettlementSettings,
}

impl Coordinator {
    pub fn new(engine: Arc<Engine>, settings: &Settings) -> Self {
        Coordinator {
            engine,
            statuses: StatusMap::new(
                &settings.settlement.won_statuses,
                &settings.settlement.lost_statuses,
            ),
            calculator: CommissionCalculator::new(&settings.commission),
            settings: settings.settlement.clone(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Registers a new open lead referred by `owner`.
    ///
    /// The caller must be the owner, an admin, or sales.
    pub async fn register_lead(
        &self,
        principal: &Principal,
        lead_id: LeadId,
        owner: AccountId,
    ) -> Result<Lead, LedgerError> {
        if !principal.active {
            return Err(LedgerError::AccountInactive(principal.account_id));
        }
        if principal.account_id != owner && !matches!(principal.role, Role::Admin | Role::Sales) {
            return Err(ValidationError::NotPermitted.into());
        }
        if lead_id.as_str().trim().is_empty() {
            return Err(ValidationError::BlankField("lead_id").into());
        }

        let store = self.engine.store();
        let lead_id = &lead_id;
        let lead = self
            .engine
            .run_unit("register_lead", move || async move {
                let mut unit = store.begin().await?;
                if unit.lead(lead_id).await?.is_some() {
                    return Err(ValidationError::DuplicateLead(lead_id.to_string()).into());
                }
                let mut account = unit
                    .account(owner)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(owner))?;
                if !account.active {
                    return Err(LedgerError::AccountInactive(owner));
                }
                account.total_leads += 1;
                let lead = Lead::new(lead_id.clone(), owner);
                unit.put_account(account);
                unit.put_lead(lead.clone());
                unit.commit().await?;
                Ok::<_, LedgerError>(lead)
            })
            .await?;

        tracing::info!(lead = %lead.id, owner = %owner, "lead registered");
        Ok(lead)
    }

    /// Applies a CRM status change to the ledger.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountInactive`] - Caller suspended, or a PENDING
    ///   entry being settled belongs to a suspended account.
    /// - [`LedgerError::LeadNotFound`] - Lead was never registered.
    /// - [`LedgerError::InsufficientFunds`] - A PENDING outflow can no longer be covered.
    /// - [`LedgerError::Persistence`] - Store failure; nothing was applied.
    pub async fn handle(&self, change: LeadStatusChange) -> Result<SettlementOutcome, LedgerError> {
        if !change.caller.active {
            return Err(LedgerError::AccountInactive(change.caller.account_id));
        }
        if change.lead_id.as_str().trim().is_empty() {
            return Err(ValidationError::BlankField("lead_id").into());
        }
        let outcome = self.statuses.resolve(&change.status)?;
        let change = self.normalize(change, outcome)?;

        let span = tracing::info_span!(
            "settle_lead",
            lead = %change.lead_id,
            status = %change.status,
            ?outcome,
        );
        let change = &change;
        async {
            let result = self
                .engine
                .run_unit("settle_lead", move || self.try_settle(change, outcome))
                .await?;

            match &result {
                SettlementOutcome::Applied(report) => {
                    tracing::info!(
                        settled = report.settled.len(),
                        cancelled = report.cancelled.len(),
                        created = report.created.len(),
                        "lead settled"
                    );
                    self.notify(report);
                }
                SettlementOutcome::AlreadyProcessed => {
                    tracing::info!("repeat delivery ignored");
                }
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }

    fn normalize(
        &self,
        mut change: LeadStatusChange,
        outcome: LeadOutcome,
    ) -> Result<LeadStatusChange, LedgerError> {
        change.payment_id = change.payment_id.filter(|key| !key.is_blank());
        if outcome != LeadOutcome::Won {
            return Ok(change);
        }
        if let Some(customer) = change.customer.as_mut() {
            customer.phone = self.engine.phones().normalize(&customer.phone);
            if customer.phone.is_empty() {
                return Err(ValidationError::BlankField("customer.phone").into());
            }
        }
        Ok(change)
    }

    async fn try_settle(
        &self,
        change: &LeadStatusChange,
        outcome: LeadOutcome,
    ) -> Result<SettlementOutcome, LedgerError> {
        let mut unit = self.engine.store().begin().await?;

        if let Some(payment) = &change.payment_id
            && unit.key_exists(payment).await?
        {
            return Ok(SettlementOutcome::AlreadyProcessed);
        }
        let mut lead = unit
            .lead(&change.lead_id)
            .await?
            .ok_or_else(|| LedgerError::LeadNotFound(change.lead_id.clone()))?;
        if lead.status.is_terminal() {
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        let mut report = SettlementReport::new(lead.id.clone(), outcome);
        match outcome {
            LeadOutcome::Open => {
                self.accrue_commission(
                    unit.as_mut(),
                    &mut lead,
                    change,
                    EntryStatus::Pending,
                    &mut report,
                )
                .await?;
            }
            LeadOutcome::Won => {
                self.resolve_pending(unit.as_mut(), &lead.id, EntryStatus::Success, &mut report)
                    .await?;
                self.accrue_commission(
                    unit.as_mut(),
                    &mut lead,
                    change,
                    EntryStatus::Success,
                    &mut report,
                )
                .await?;
                self.accrue_loyalty(unit.as_mut(), &lead, change, &mut report)
                    .await?;
                self.count_conversion(unit.as_mut(), lead.owner).await?;
            }
            LeadOutcome::Lost => {
                self.resolve_pending(unit.as_mut(), &lead.id, EntryStatus::Cancelled, &mut report)
                    .await?;
            }
        }

        lead.record_status(change.status.trim(), outcome);
        unit.put_lead(lead);
        unit.commit().await.map_err(|e| match e {
            StoreError::DuplicateKey(key) => LedgerError::DuplicateSettlement(IdempotencyKey(key)),
            other => other.into(),
        })?;
        Ok(SettlementOutcome::Applied(report))
    }

    /// Flips every PENDING entry of the lead to `target`, applying account
    /// effects when the target is SUCCESS.
    async fn resolve_pending(
        &self,
        unit: &mut dyn UnitOfWork,
        lead: &LeadId,
        target: EntryStatus,
        report: &mut SettlementReport,
    ) -> Result<(), LedgerError> {
        for mut entry in unit.pending_for_reference(lead.as_str()).await? {
            if target == EntryStatus::Success {
                let mut account = unit
                    .account(entry.account_id)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(entry.account_id))?;
                if !account.active {
                    return Err(LedgerError::AccountInactive(account.id));
                }
                account.apply_effect(entry.kind, entry.amount)?;
                unit.put_account(account);
            }
            entry.transition(target)?;
            unit.put_entry(entry.clone());
            match target {
                EntryStatus::Cancelled => report.cancelled.push(entry),
                _ => report.settled.push(entry),
            }
        }
        Ok(())
    }

    /// Creates the lead's commission entry, once per lead.
    async fn accrue_commission(
        &self,
        unit: &mut dyn UnitOfWork,
        lead: &mut Lead,
        change: &LeadStatusChange,
        status: EntryStatus,
        report: &mut SettlementReport,
    ) -> Result<(), LedgerError> {
        let Some(gross) = change.amount else {
            return Ok(());
        };
        let mut owner = unit
            .account(lead.owner)
            .await?
            .ok_or(LedgerError::AccountNotFound(lead.owner))?;
        let commission = self.calculator.accrue(gross, Tier::of(owner.role)).commission;
        if commission == 0 {
            tracing::debug!(%gross, "commission floors to zero; no entry");
            return Ok(());
        }

        if let Some(existing) = lead.commission_entry {
            let recorded = unit.entry(existing).await?.map_or(0, |e| e.amount);
            if recorded != commission {
                tracing::warn!(
                    recorded,
                    requested = commission,
                    "commission already recorded for lead"
                );
                report.dispute = Some(CommissionDispute {
                    account: owner.id,
                    recorded,
                    requested: commission,
                });
            }
            return Ok(());
        }
        if !owner.active {
            tracing::warn!(owner = %owner.id, "owner suspended; commission skipped");
            return Ok(());
        }

        let key = change
            .payment_id
            .clone()
            .unwrap_or_else(|| IdempotencyKey(format!("{}:commission", lead.id)));
        let entry = LedgerEntry::new(
            owner.id,
            change.caller.account_id,
            EntryKind::Credit,
            commission,
            lead.id.as_str(),
            key,
            "Commission added",
            status,
        );
        if status == EntryStatus::Success {
            owner.apply_effect(entry.kind, entry.amount)?;
            unit.put_account(owner);
        }
        lead.commission_entry = Some(entry.id);
        unit.put_entry(entry.clone());
        report.created.push(entry);
        Ok(())
    }

    /// Credits loyalty points to the lead's end customer, creating the
    /// customer's account when the phone is unknown.
    async fn accrue_loyalty(
        &self,
        unit: &mut dyn UnitOfWork,
        lead: &Lead,
        change: &LeadStatusChange,
        report: &mut SettlementReport,
    ) -> Result<(), LedgerError> {
        let (Some(source), Some(customer), Some(gross)) =
            (self.settings.loyalty_source, &change.customer, change.amount)
        else {
            return Ok(());
        };
        let points = self.calculator.accrue(gross, Tier::Standard).loyalty_points;
        if points == 0 {
            return Ok(());
        }

        let mut account = match unit.account_by_phone(&customer.phone).await? {
            Some(account) => account,
            None => {
                let name = customer.name.clone().unwrap_or_else(|| customer.phone.clone());
                let mut fields = NewAccount::new(name, customer.phone.clone(), Role::User);
                fields.email = customer.email.clone();
                let account = Account::create(fields);
                tracing::info!(account = %account.id, "customer account created");
                account
            }
        };
        if !account.active {
            tracing::warn!(account = %account.id, "customer suspended; loyalty points skipped");
            return Ok(());
        }

        let anchor = change
            .payment_id
            .as_ref()
            .map_or_else(|| lead.id.to_string(), |key| key.to_string());
        let entry = LedgerEntry::new(
            account.id,
            source,
            EntryKind::PointsCredit,
            points,
            lead.id.as_str(),
            IdempotencyKey(format!("{anchor}:points")),
            "Loyalty points added",
            EntryStatus::Success,
        );
        account.apply_effect(entry.kind, entry.amount)?;
        unit.put_account(account);
        unit.put_entry(entry.clone());
        report.created.push(entry);
        Ok(())
    }

    async fn count_conversion(
        &self,
        unit: &mut dyn UnitOfWork,
        owner: AccountId,
    ) -> Result<(), LedgerError> {
        if let Some(mut account) = unit.account(owner).await?
            && account.active
        {
            account.total_leads_converted += 1;
            unit.put_account(account);
        }
        Ok(())
    }

    fn notify(&self, report: &SettlementReport) {
        let dispatcher = self.engine.dispatcher();
        for entry in report.applied() {
            dispatcher.dispatch(Notification::Transaction {
                account: entry.account_id,
                entry: entry.id,
                kind: entry.kind,
                amount: entry.amount,
            });
        }
        if let Some(dispute) = report.dispute {
            dispatcher.dispatch(Notification::CommissionDispute {
                lead: report.lead.clone(),
                account: dispute.account,
                recorded: dispute.recorded,
                requested: dispute.requested,
            });
        }
    }
}
