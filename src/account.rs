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

//! Account aggregate.
//!
//! An [`Account`] is the per-user summary of every applied ledger entry:
//! currency balance, loyalty points, and their lifetime counters. It is a
//! plain value; the store decides who may mutate it and when.
//!
//! # Example
//!
//! ```
//! use referral_ledger::{Account, EntryKind, NewAccount, Role};
//!
//! let mut account = Account::create(NewAccount::new("Asha", "9000000001", Role::User));
//! account.apply_effect(EntryKind::Credit, 300).unwrap();
//! assert_eq!(account.balance, 300);
//! assert!(account.apply_effect(EntryKind::Withdrawal, 301).is_err());
//! ```

use crate::base::{AccountId, Role};
use crate::config::SettlementSettings;
use crate::error::{LedgerError, ValidationError};
use crate::transaction::EntryKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields required to open an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub role: Role,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, role: Role) -> Self {
        NewAccount {
            name: name.into(),
            phone: phone.into(),
            email: None,
            role,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub role: Role,
    pub active: bool,
    pub name: String,
    /// Unique identifying contact.
    pub phone: String,
    pub email: Option<String>,
    pub balance: u64,
    pub lifetime_earned: u64,
    pub lifetime_withdrawn: u64,
    pub points: u64,
    pub lifetime_points_earned: u64,
    pub lifetime_points_withdrawn: u64,
    pub total_leads: u64,
    pub total_leads_converted: u64,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every committed change.
    pub version: u64,
}

impl Account {
    pub fn create(fields: NewAccount) -> Self {
        Account {
            id: AccountId::new(),
            role: fields.role,
            active: true,
            name: fields.name,
            phone: fields.phone,
            email: fields.email,
            balance: 0,
            lifetime_earned: 0,
            lifetime_withdrawn: 0,
            points: 0,
            lifetime_points_earned: 0,
            lifetime_points_withdrawn: 0,
            total_leads: 0,
            total_leads_converted: 0,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Applies the balance or points effect of one ledger entry.
    ///
    /// On error the account is left untouched.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NonPositiveAmount`] - `amount` is zero.
    /// - [`LedgerError::InsufficientFunds`] - An outflow exceeds the current value.
    /// - [`ValidationError::Overflow`] - An inflow would overflow a counter.
    pub fn apply_effect(&mut self, kind: EntryKind, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        match kind {
            EntryKind::Credit => {
                let (balance, earned) = self.inflow(self.balance, self.lifetime_earned, amount)?;
                self.balance = balance;
                self.lifetime_earned = earned;
            }
            EntryKind::PointsCredit => {
                let (points, earned) =
                    self.inflow(self.points, self.lifetime_points_earned, amount)?;
                self.points = points;
                self.lifetime_points_earned = earned;
            }
            EntryKind::Debit | EntryKind::Withdrawal => {
                let (balance, withdrawn) =
                    self.outflow(kind, self.balance, self.lifetime_withdrawn, amount)?;
                self.balance = balance;
                self.lifetime_withdrawn = withdrawn;
            }
            EntryKind::PointsDebit => {
                let (points, withdrawn) =
                    self.outflow(kind, self.points, self.lifetime_points_withdrawn, amount)?;
                self.points = points;
                self.lifetime_points_withdrawn = withdrawn;
            }
        }
        Ok(())
    }

    /// Current value of the pool that `kind` draws from.
    pub fn available_for(&self, kind: EntryKind) -> u64 {
        if kind.is_points() { self.points } else { self.balance }
    }

    fn inflow(&self, current: u64, earned: u64, amount: u64) -> Result<(u64, u64), LedgerError> {
        let current = current.checked_add(amount).ok_or(ValidationError::Overflow)?;
        let earned = earned.checked_add(amount).ok_or(ValidationError::Overflow)?;
        Ok((current, earned))
    }

    fn outflow(
        &self,
        kind: EntryKind,
        current: u64,
        withdrawn: u64,
        amount: u64,
    ) -> Result<(u64, u64), LedgerError> {
        let Some(remaining) = current.checked_sub(amount) else {
            return Err(LedgerError::InsufficientFunds {
                account: self.id,
                kind,
                requested: amount,
                available: current,
            });
        };
        let withdrawn = withdrawn.checked_add(amount).ok_or(ValidationError::Overflow)?;
        Ok((remaining, withdrawn))
    }
}

/// How contact phone numbers are normalised before they hit the unique index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneFormat {
    pub country_code: String,
    pub local_digits: usize,
}

impl PhoneFormat {
    pub fn normalize(&self, raw: &str) -> String {
        normalize_phone(raw, &self.country_code, self.local_digits)
    }
}

impl From<&SettlementSettings> for PhoneFormat {
    fn from(settings: &SettlementSettings) -> Self {
        PhoneFormat {
            country_code: settings.country_code.clone(),
            local_digits: settings.local_phone_digits,
        }
    }
}

impl Default for PhoneFormat {
    fn default() -> Self {
        PhoneFormat::from(&SettlementSettings::default())
    }
}

/// Normalises a phone number to its local form.
///
/// Strips non-digits, then drops a leading `country_code` when the remaining
/// digits are exactly the country code plus `local_digits` digits long.
pub fn normalize_phone(raw: &str, country_code: &str, local_digits: usize) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !country_code.is_empty()
        && digits.len() == country_code.len() + local_digits
        && digits.starts_with(country_code)
    {
        return digits[country_code.len()..].to_owned();
    }
    digits
}
