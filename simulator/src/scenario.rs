//! Simulation scenarios.

use std::path::Path;

use payledger_common::PostingType;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Accounts and postings are referred to by aliases chosen in the scenario;
/// the controller maps them to store identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Create an account with a fresh document number.
    CreateAccount { account: String },
    /// Post an unsigned amount; the sign follows the posting type.
    Post {
        account: String,
        posting_type: PostingType,
        amount: Decimal,
        label: String,
    },
    /// Post the same amount once per label, all at the same time.
    PostConcurrently {
        account: String,
        posting_type: PostingType,
        amount: Decimal,
        labels: Vec<String>,
    },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum AssertCondition {
    /// A posting's remaining balance equals `expected`.
    RemainingEquals { label: String, expected: Decimal },
    /// The remaining balances of the labelled postings, in any order, equal
    /// `expected`.
    RemainingSetEquals { labels: Vec<String>, expected: Vec<Decimal> },
    /// The account's outstanding debt equals `expected`.
    OutstandingDebtEquals { account: String, expected: Decimal },
}

/// Names of the built-in scenarios.
pub const BUILTIN_SCENARIOS: [&str; 4] =
    ["fifo-partial", "exact-settlement", "overshoot", "contention"];

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "fifo-partial" => Ok(Self::fifo_partial()),
            "exact-settlement" => Ok(Self::exact_settlement()),
            "overshoot" => Ok(Self::overshoot()),
            "contention" => Ok(Self::contention()),
            path if path.ends_with(".json") && Path::new(path).exists() => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                BUILTIN_SCENARIOS.join(", ")
            )),
        }
    }

    /// A credit partially settles the oldest debit and leaves the next one
    /// untouched.
    fn fifo_partial() -> Self {
        Self {
            name: "fifo-partial".to_string(),
            description: "Credit of 40 against debits of 50 and 30".to_string(),
            steps: vec![
                create("acc"),
                post("acc", PostingType::NormalPurchase, dec!(50), "d1"),
                post("acc", PostingType::Withdrawal, dec!(30), "d2"),
                post("acc", PostingType::CreditVoucher, dec!(40), "c1"),
                remaining("d1", dec!(-10)),
                remaining("d2", dec!(-30)),
                remaining("c1", dec!(0)),
                ScenarioStep::Assert {
                    condition: AssertCondition::OutstandingDebtEquals {
                        account: "acc".to_string(),
                        expected: dec!(40),
                    },
                },
            ],
        }
    }

    /// A credit exactly zeroes a debit.
    fn exact_settlement() -> Self {
        Self {
            name: "exact-settlement".to_string(),
            description: "Credit of 50 against a debit of 50".to_string(),
            steps: vec![
                create("acc"),
                post("acc", PostingType::InstallmentPurchase, dec!(50), "d1"),
                post("acc", PostingType::CreditVoucher, dec!(50), "c1"),
                remaining("d1", dec!(0)),
                remaining("c1", dec!(0)),
            ],
        }
    }

    /// A credit larger than all debt keeps the difference.
    fn overshoot() -> Self {
        Self {
            name: "overshoot".to_string(),
            description: "Credit of 50 against a debit of 20".to_string(),
            steps: vec![
                create("acc"),
                post("acc", PostingType::NormalPurchase, dec!(20), "d1"),
                post("acc", PostingType::CreditVoucher, dec!(50), "c1"),
                remaining("d1", dec!(0)),
                remaining("c1", dec!(30)),
                // Leftover credit is inert.
                post("acc", PostingType::Withdrawal, dec!(10), "d2"),
                remaining("d2", dec!(-10)),
            ],
        }
    }

    /// Two concurrent credits race for one debit; exactly one settles it.
    fn contention() -> Self {
        Self {
            name: "contention".to_string(),
            description: "Two concurrent credits of 50 against one debit of 50".to_string(),
            steps: vec![
                create("acc"),
                create("other"),
                post("acc", PostingType::NormalPurchase, dec!(50), "d1"),
                post("other", PostingType::NormalPurchase, dec!(5), "o1"),
                ScenarioStep::PostConcurrently {
                    account: "acc".to_string(),
                    posting_type: PostingType::CreditVoucher,
                    amount: dec!(50),
                    labels: vec!["c1".to_string(), "c2".to_string()],
                },
                remaining("d1", dec!(0)),
                ScenarioStep::Assert {
                    condition: AssertCondition::RemainingSetEquals {
                        labels: vec!["c1".to_string(), "c2".to_string()],
                        expected: vec![dec!(0), dec!(50)],
                    },
                },
                remaining("o1", dec!(-5)),
            ],
        }
    }
}

fn create(account: &str) -> ScenarioStep {
    ScenarioStep::CreateAccount {
        account: account.to_string(),
    }
}

fn post(account: &str, posting_type: PostingType, amount: Decimal, label: &str) -> ScenarioStep {
    ScenarioStep::Post {
        account: account.to_string(),
        posting_type,
        amount,
        label: label.to_string(),
    }
}

fn remaining(label: &str, expected: Decimal) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::RemainingEquals {
            label: label.to_string(),
            expected,
        },
    }
}
