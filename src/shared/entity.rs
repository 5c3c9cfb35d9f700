//! # Entity Records
//!
//! Domain records tracked by the local store together with their
//! synchronization metadata.
//!
//! Three kinds of entity are synchronized:
//!
//! - **Transactions** - income and expense entries for a financial role
//! - **Categories** - per-role spending categories with optional budgets
//! - **Group contributions** - weekly chama (group savings) contributions
//!
//! Every record carries the same sync metadata regardless of its body:
//! `updated_at`, `synced_at`, `is_dirty` and the last acknowledged
//! `server_version`.
//!
//! ## Usage
//!
//! ```rust
//! use fintrack_sync::shared::entity::{EntityBody, EntityRecord, Transaction, TransactionKind, FinancialRole};
//!
//! let body = EntityBody::Transaction(Transaction::new(
//!     FinancialRole::Personal,
//!     TransactionKind::Expense,
//!     500,
//!     chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
//! ));
//! let record = EntityRecord::new_local("t1", body, chrono::Utc::now());
//! assert!(record.is_dirty);
//! ```

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SharedError;

/// Which entity table a record or operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Income or expense entry
    Transaction,
    /// Spending category
    Category,
    /// Chama group contribution
    GroupContribution,
}

impl EntityType {
    /// Storage and wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Transaction => "transaction",
            EntityType::Category => "category",
            EntityType::GroupContribution => "group_contribution",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" => Ok(EntityType::Transaction),
            "category" => Ok(EntityType::Category),
            "group_contribution" => Ok(EntityType::GroupContribution),
            other => Err(SharedError::validation(
                "entity_type",
                format!("unknown entity type '{}'", other),
            )),
        }
    }
}

/// Financial role a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialRole {
    Personal,
    Business,
    /// Group savings
    Chama,
    SideIncome,
}

impl FinancialRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancialRole::Personal => "personal",
            FinancialRole::Business => "business",
            FinancialRole::Chama => "chama",
            FinancialRole::SideIncome => "side_income",
        }
    }
}

impl fmt::Display for FinancialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FinancialRole {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(FinancialRole::Personal),
            "business" => Ok(FinancialRole::Business),
            "chama" => Ok(FinancialRole::Chama),
            "side_income" => Ok(FinancialRole::SideIncome),
            other => Err(SharedError::validation(
                "role",
                format!("unknown financial role '{}'", other),
            )),
        }
    }
}

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// Income or expense entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub role: FinancialRole,
    pub kind: TransactionKind,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub category_id: Option<String>,
    pub description: String,
    pub occurred_on: NaiveDate,
}

impl Transaction {
    /// Create a transaction with the default currency and no category
    pub fn new(role: FinancialRole, kind: TransactionKind, amount: i64, occurred_on: NaiveDate) -> Self {
        Self {
            role,
            kind,
            amount,
            currency: "KES".to_string(),
            category_id: None,
            description: String::new(),
            occurred_on,
        }
    }
}

/// Spending category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub role: FinancialRole,
    pub name: String,
    /// Monthly budget in minor currency units
    pub monthly_budget: Option<i64>,
}

/// Weekly contribution to a chama group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupContribution {
    pub group_id: String,
    pub member_name: String,
    /// Amount in minor currency units
    pub amount: i64,
    /// ISO week, e.g. `2026-W42`
    pub week: String,
}

/// Domain fields of a record, tagged by entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "data", rename_all = "snake_case")]
pub enum EntityBody {
    Transaction(Transaction),
    Category(Category),
    GroupContribution(GroupContribution),
}

impl EntityBody {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityBody::Transaction(_) => EntityType::Transaction,
            EntityBody::Category(_) => EntityType::Category,
            EntityBody::GroupContribution(_) => EntityType::GroupContribution,
        }
    }

    /// Decode the domain fields carried in a queue payload
    pub fn from_payload(entity_type: EntityType, payload: &serde_json::Value) -> Result<Self, SharedError> {
        let body = match entity_type {
            EntityType::Transaction => EntityBody::Transaction(serde_json::from_value(payload.clone())?),
            EntityType::Category => EntityBody::Category(serde_json::from_value(payload.clone())?),
            EntityType::GroupContribution => {
                EntityBody::GroupContribution(serde_json::from_value(payload.clone())?)
            }
        };
        Ok(body)
    }

    /// Domain fields as a queue payload
    pub fn to_payload(&self) -> Result<serde_json::Value, SharedError> {
        let value = match self {
            EntityBody::Transaction(t) => serde_json::to_value(t)?,
            EntityBody::Category(c) => serde_json::to_value(c)?,
            EntityBody::GroupContribution(g) => serde_json::to_value(g)?,
        };
        Ok(value)
    }

    /// Financial role, when the body has one
    pub fn role(&self) -> Option<FinancialRole> {
        match self {
            EntityBody::Transaction(t) => Some(t.role),
            EntityBody::Category(c) => Some(c.role),
            EntityBody::GroupContribution(_) => Some(FinancialRole::Chama),
        }
    }

    /// ISO week the record falls in, when it is dated
    pub fn week(&self) -> Option<String> {
        match self {
            EntityBody::Transaction(t) => Some(iso_week(t.occurred_on)),
            EntityBody::Category(_) => None,
            EntityBody::GroupContribution(g) => Some(g.week.clone()),
        }
    }
}

/// Format a date as an ISO week label (`YYYY-Www`)
pub fn iso_week(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// A domain record plus its synchronization metadata
///
/// A clean record (`is_dirty == false`) always has `synced_at` set and
/// matches the version the remote last accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Client-assigned id, immutable
    pub id: String,
    pub body: EntityBody,
    /// Last local mutation
    pub updated_at: DateTime<Utc>,
    /// Last remote acknowledgment
    pub synced_at: Option<DateTime<Utc>>,
    pub is_dirty: bool,
    /// Version the remote last acknowledged
    pub server_version: Option<String>,
}

impl EntityRecord {
    /// A freshly mutated local record that has never been acknowledged
    pub fn new_local(id: impl Into<String>, body: EntityBody, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            body,
            updated_at: now,
            synced_at: None,
            is_dirty: true,
            server_version: None,
        }
    }

    /// A clean record holding the remote's copy at `version`
    pub fn from_remote(
        id: impl Into<String>,
        body: EntityBody,
        updated_at: DateTime<Utc>,
        version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            body,
            updated_at,
            synced_at: Some(now),
            is_dirty: false,
            server_version: Some(version.into()),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.body.entity_type()
    }

    /// Apply a local mutation, keeping the last acknowledged version
    pub fn with_local_change(&self, body: EntityBody, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            body,
            updated_at: now,
            synced_at: self.synced_at,
            is_dirty: true,
            server_version: self.server_version.clone(),
        }
    }

    /// Mark the record as acknowledged by the remote at `version`
    pub fn mark_clean(&mut self, version: impl Into<String>, now: DateTime<Utc>) {
        self.server_version = Some(version.into());
        self.synced_at = Some(now);
        self.is_dirty = false;
    }
}

/// Scan filter for [`EntityStore::get_all`](crate::local_db::store::EntityStore::get_all)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    pub dirty: Option<bool>,
    pub role: Option<FinancialRole>,
    pub week: Option<String>,
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = Some(dirty);
        self
    }

    pub fn role(mut self, role: FinancialRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn week(mut self, week: impl Into<String>) -> Self {
        self.week = Some(week.into());
        self
    }

    /// Whether a record passes every set criterion
    pub fn matches(&self, record: &EntityRecord) -> bool {
        if let Some(entity_type) = self.entity_type {
            if record.entity_type() != entity_type {
                return false;
            }
        }
        if let Some(dirty) = self.dirty {
            if record.is_dirty != dirty {
                return false;
            }
        }
        if let Some(role) = self.role {
            if record.body.role() != Some(role) {
                return false;
            }
        }
        if let Some(week) = &self.week {
            if record.body.week().as_deref() != Some(week.as_str()) {
                return false;
            }
        }
        true
    }
}
