//! Sample entity types.
//!
//! Accounts are top-level and act as role boundaries. Transactions live
//! under accounts. Notes live under accounts or other notes. Coins are
//! free-standing.

use serde::{Deserialize, Serialize};

use trustchain_core::{Entity, HasRoles, ParentRule, Schema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,
    pub balance: i64,
}

impl Account {
    pub fn new(owner: &str, balance: i64) -> Self {
        Self {
            owner: owner.to_string(),
            balance,
        }
    }
}

impl Entity for Account {
    const TYPE_NAME: &'static str = "account";
}

impl HasRoles for Account {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub amount: i64,
    pub memo: String,
}

impl Entity for Transaction {
    const TYPE_NAME: &'static str = "transaction";

    fn parent_rule() -> ParentRule {
        ParentRule::Within(vec![Account::entity_type()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl Entity for Note {
    const TYPE_NAME: &'static str = "note";

    fn parent_rule() -> ParentRule {
        ParentRule::Within(vec![Account::entity_type(), Note::entity_type()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denomination: u32,
}

impl Entity for Coin {
    const TYPE_NAME: &'static str = "coin";
}

/// Schema with every sample type registered.
pub fn sample_schema() -> Schema {
    Schema::builder()
        .roles::<Account>()
        .entity::<Transaction>()
        .entity::<Note>()
        .entity::<Coin>()
        .build()
}
