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

//! Commission and loyalty-point accrual.
//!
//! Every product is floored to whole units; fractional currency or points are
//! never produced.

use crate::base::{Role, units_from_decimal};
use crate::config::CommissionSettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Commission tier of a referring account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Standard,
    Gold,
}

impl Tier {
    pub fn of(role: Role) -> Self {
        match role {
            Role::GoldUser => Tier::Gold,
            _ => Tier::Standard,
        }
    }
}

/// Result of [`CommissionCalculator::accrue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accrual {
    pub commission: u64,
    pub loyalty_points: u64,
}

impl Accrual {
    pub fn is_empty(&self) -> bool {
        self.commission == 0 && self.loyalty_points == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionCalculator {
    standard_rate: Decimal,
    gold_rate: Decimal,
    loyalty_rate: Decimal,
}

impl CommissionCalculator {
    pub fn new(settings: &CommissionSettings) -> Self {
        CommissionCalculator {
            standard_rate: settings.standard_rate,
            gold_rate: settings.gold_rate,
            loyalty_rate: settings.loyalty_rate,
        }
    }

    pub fn rate(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::Standard => self.standard_rate,
            Tier::Gold => self.gold_rate,
        }
    }

    /// Computes the commission and loyalty points earned on `gross`.
    ///
    /// Zero or negative `gross` accrues nothing.
    pub fn accrue(&self, gross: Decimal, tier: Tier) -> Accrual {
        let gross = gross.floor();
        if gross <= Decimal::ZERO {
            return Accrual::default();
        }
        Accrual {
            commission: units_from_decimal(gross * self.rate(tier)),
            loyalty_points: units_from_decimal(gross * self.loyalty_rate),
        }
    }
}

impl Default for CommissionCalculator {
    fn default() -> Self {
        CommissionCalculator {
            standard_rate: dec!(0.1),
            gold_rate: dec!(0.2),
            loyalty_rate: dec!(0.05),
        }
    }
}
