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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use referral_ledger::{
    Account, AccountId, Coordinator, CustomerContact, Engine, EntryKind, EntryRequest,
    EntryStatus, IdempotencyKey, LeadId, LeadStatusChange, LedgerError, MemoryStore, NewAccount,
    Principal, Role, Settings, ValidationError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Referral Ledger - Replay a CSV script against an in-memory ledger
///
/// Reads ledger operations from a CSV file and writes the resulting account
/// states to stdout.
#[derive(Parser, Debug)]
#[command(name = "referral-ledger")]
#[command(about = "Replays referral ledger operations from CSV", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected header: op,phone,name,role,lead,kind,amount,reference,key,status,comment
    /// Example: referral-ledger script.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional TOML settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "cannot load settings");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    let replay = Replay::new(&settings);
    let summary = match replay.run(BufReader::new(file)).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "cannot read operations");
            process::exit(1);
        }
    };
    tracing::info!(applied = summary.applied, skipped = summary.skipped, "replay finished");

    if let Err(e) = replay.write_accounts(std::io::stdout()).await {
        tracing::error!(error = %e, "cannot write accounts");
        process::exit(1);
    }
}

/// Raw CSV record. Columns unused by an operation are left empty.
#[derive(Debug, Default, Deserialize)]
struct CsvRecord {
    op: String,
    phone: Option<String>,
    name: Option<String>,
    role: Option<String>,
    lead: Option<String>,
    kind: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    reference: Option<String>,
    key: Option<String>,
    status: Option<String>,
    comment: Option<String>,
}

/// Account state as written to the output CSV.
#[derive(Debug, Serialize)]
struct AccountRow {
    id: AccountId,
    name: String,
    phone: String,
    role: Role,
    active: bool,
    balance: u64,
    lifetime_earned: u64,
    lifetime_withdrawn: u64,
    points: u64,
    lifetime_points_earned: u64,
    lifetime_points_withdrawn: u64,
    total_leads: u64,
    total_leads_converted: u64,
}

impl From<Account> for AccountRow {
    fn from(account: Account) -> Self {
        AccountRow {
            id: account.id,
            name: account.name,
            phone: account.phone,
            role: account.role,
            active: account.active,
            balance: account.balance,
            lifetime_earned: account.lifetime_earned,
            lifetime_withdrawn: account.lifetime_withdrawn,
            points: account.points,
            lifetime_points_earned: account.lifetime_points_earned,
            lifetime_points_withdrawn: account.lifetime_points_withdrawn,
            total_leads: account.total_leads,
            total_leads_converted: account.total_leads_converted,
        }
    }
}

/// Why a script row was not applied.
#[derive(Error, Debug)]
enum RowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("unknown operation `{0}`")]
    UnknownOp(String),

    #[error("no account with phone {0}")]
    UnknownPhone(String),
}

impl From<ValidationError> for RowError {
    fn from(e: ValidationError) -> Self {
        RowError::Ledger(e.into())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    applied: usize,
    skipped: usize,
}

/// Ledger plus the synthetic principals a script acts through.
struct Replay {
    coordinator: Coordinator,
    /// Operator for account, lead and manual entry operations.
    admin: Principal,
    /// Caller of status changes, standing in for the CRM.
    crm: Principal,
}

impl Replay {
    fn new(settings: &Settings) -> Self {
        let engine = Arc::new(Engine::new(Arc::new(MemoryStore::new()), settings));
        Replay {
            coordinator: Coordinator::new(engine, settings),
            admin: Principal::new(AccountId::new(), Role::Admin),
            crm: Principal::new(
                settings.settlement.loyalty_source.unwrap_or_default(),
                Role::Admin,
            ),
        }
    }

    fn engine(&self) -> &Engine {
        self.coordinator.engine()
    }

    /// Applies every row in order. Malformed rows and rejected operations are
    /// logged and skipped.
    async fn run<R: Read>(&self, reader: R) -> Result<Summary, csv::Error> {
        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        let mut summary = Summary::default();
        for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
            let outcome = match result {
                Ok(record) => self.apply(record).await,
                Err(e) => {
                    tracing::warn!(line = line + 2, error = %e, "skipping malformed row");
                    summary.skipped += 1;
                    continue;
                }
            };
            match outcome {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    tracing::warn!(line = line + 2, error = %e, "skipping rejected operation");
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn apply(&self, record: CsvRecord) -> Result<(), RowError> {
        match record.op.to_lowercase().as_str() {
            "open" => {
                let role = match record.role.as_deref() {
                    Some(role) => role.parse()?,
                    None => Role::User,
                };
                let phone = required(record.phone, "phone")?;
                let name = record.name.unwrap_or_else(|| phone.clone());
                self.engine()
                    .open_account(&self.admin, NewAccount::new(name, phone, role))
                    .await?;
            }
            "lead" => {
                let lead = required(record.lead, "lead")?;
                let owner = self.resolve(record.phone).await?;
                self.coordinator
                    .register_lead(&self.admin, LeadId(lead), owner.id)
                    .await?;
            }
            "record" => {
                let account = self.resolve(record.phone).await?;
                let caller = match record.role.as_deref() {
                    Some(role) => Principal::new(self.admin.account_id, role.parse()?),
                    None => self.admin,
                };
                let kind: EntryKind = required(record.kind, "kind")?.parse()?;
                let status = match record.status.as_deref() {
                    Some(status) => status.parse()?,
                    None => EntryStatus::Success,
                };
                let reference = required(record.reference, "reference")?;
                let request = EntryRequest {
                    account_id: account.id,
                    kind,
                    amount: record.amount.unwrap_or(Decimal::ZERO),
                    comment: record.comment.unwrap_or_else(|| reference.clone()),
                    reference,
                    idempotency_key: IdempotencyKey(required(record.key, "key")?),
                    status,
                };
                self.engine().record_transaction(&caller, request).await?;
            }
            "status" => {
                let change = LeadStatusChange {
                    lead_id: LeadId(required(record.lead, "lead")?),
                    status: required(record.status, "status")?,
                    amount: record.amount,
                    payment_id: record.key.map(IdempotencyKey),
                    customer: record.phone.map(|phone| CustomerContact {
                        phone,
                        name: record.name,
                        email: None,
                    }),
                    caller: self.crm,
                };
                self.coordinator.handle(change).await?;
            }
            other => return Err(RowError::UnknownOp(other.to_owned())),
        }
        Ok(())
    }

    async fn resolve(&self, phone: Option<String>) -> Result<Account, RowError> {
        let phone = required(phone, "phone")?;
        match self.engine().account_by_phone(&phone).await? {
            Some(account) => Ok(account),
            None => Err(RowError::UnknownPhone(phone)),
        }
    }

    /// Writes every account as CSV.
    async fn write_accounts<W: Write>(&self, writer: W) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = Writer::from_writer(writer);
        for account in self.engine().store().accounts().await? {
            wtr.serialize(AccountRow::from(account))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ValidationError::BlankField(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "op,phone,name,role,lead,kind,amount,reference,key,status,comment\n";

    async fn replay(rows: &str) -> (Replay, Summary) {
        let replay = Replay::new(&Settings::default());
        let summary = replay
            .run(Cursor::new(format!("{HEADER}{rows}")))
            .await
            .unwrap();
        (replay, summary)
    }

    async fn balance(replay: &Replay, phone: &str) -> u64 {
        replay
            .engine()
            .account_by_phone(phone)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn open_and_credit() {
        let (replay, summary) = replay(
            "open,9000000001,Asha,user,,,,,,,\n\
             record,9000000001,,,,CREDIT,100.9,manual,k-1,,\n",
        )
        .await;

        assert_eq!(summary, Summary { applied: 2, skipped: 0 });
        assert_eq!(balance(&replay, "9000000001").await, 100);
    }

    #[tokio::test]
    async fn lead_won_credits_commission() {
        let (replay, summary) = replay(
            "open,9000000001,Asha,gold-user,,,,,,,\n\
             lead,9000000001,,,L-1,,,,,,\n\
             status,,,,L-1,,1000,,pay-1,Shoot Completed,\n\
             status,,,,L-1,,1000,,pay-1,Shoot Completed,\n",
        )
        .await;

        assert_eq!(summary.skipped, 0);
        assert_eq!(balance(&replay, "9000000001").await, 200);
    }

    #[tokio::test]
    async fn rejected_rows_are_skipped() {
        let (replay, summary) = replay(
            "open,9000000001,Asha,user,,,,,,,\n\
             record,9000000001,,sales,,CREDIT,50,manual,k-1,,\n\
             record,9000000001,,,,DEBIT,50,manual,k-2,,\n\
             refund,9000000001,,,,,,,,,\n",
        )
        .await;

        assert_eq!(summary, Summary { applied: 1, skipped: 3 });
        assert_eq!(balance(&replay, "9000000001").await, 0);
    }

    #[tokio::test]
    async fn write_accounts_to_csv() {
        let (replay, _) = replay("open,9000000001,Asha,user,,,,,,,\n").await;

        let mut output = Vec::new();
        replay.write_accounts(&mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("id,name,phone,role,active,balance,"));
        assert!(output.contains(",Asha,9000000001,user,true,0,"));
    }
}
