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

//! Runtime settings.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `LEDGER_*` environment variables using `__` as the
//! nesting separator (for example `LEDGER_ENGINE__COMMIT_TIMEOUT_MS=500`).

use crate::base::AccountId;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub commission: CommissionSettings,
    pub settlement: SettlementSettings,
    pub engine: EngineSettings,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder.add_source(env).build()?;
        Ok(config.try_deserialize()?)
    }
}

/// `LEDGER_*` variables; status lists are comma separated.
fn environment() -> Environment {
    Environment::with_prefix("LEDGER")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("settlement.won_statuses")
        .with_list_parse_key("settlement.lost_statuses")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    pub standard_rate: Decimal,
    pub gold_rate: Decimal,
    pub loyalty_rate: Decimal,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        CommissionSettings {
            standard_rate: dec!(0.1),
            gold_rate: dec!(0.2),
            loyalty_rate: dec!(0.05),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    /// CRM statuses that mean the lead converted.
    pub won_statuses: Vec<String>,
    /// CRM statuses that mean the lead is dead.
    pub lost_statuses: Vec<String>,
    /// Principal recorded as creator of loyalty accruals. Accrual is off when unset.
    pub loyalty_source: Option<AccountId>,
    pub country_code: String,
    pub local_phone_digits: usize,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        SettlementSettings {
            won_statuses: vec!["Shoot Completed".to_owned()],
            lost_statuses: vec!["Lost".to_owned()],
            loyalty_source: None,
            country_code: "91".to_owned(),
            local_phone_digits: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Extra attempts for a unit of work that lost an optimistic race.
    pub max_conflict_retries: u32,
    pub commit_timeout_ms: u64,
    pub statement_page_size: usize,
}

impl EngineSettings {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_conflict_retries: 5,
            commit_timeout_ms: 2_000,
            statement_page_size: 20,
        }
    }
}
