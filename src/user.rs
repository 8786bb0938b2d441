//! Account profile returned by the debrid service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccountType {
    Premium,
    Free,
}

/// User profile as returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// Seconds of premium left.
    #[serde(default)]
    pub premium: u64,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_premium(&self) -> bool {
        self.account_type == AccountType::Premium && self.premium > 0
    }

    pub fn premium_days_left(&self) -> u64 {
        self.premium / SECONDS_PER_DAY
    }
}
