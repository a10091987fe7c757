//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use payledger_common::{AccountId, LedgerError, PostingClass, PostingId, PostingType};
use payledger_engine::SettlementEngine;
use payledger_ledger::LedgerStore;

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};
use crate::verify::{verify_accounts, Violation};

/// Engine over whichever store the simulator was started with.
pub type SimEngine = SettlementEngine<Arc<dyn LedgerStore>>;

/// Parameters of a random run.
#[derive(Debug, Clone)]
pub struct RandomRun {
    pub accounts: usize,
    pub postings: usize,
    pub concurrency: usize,
    pub credit_ratio: f64,
}

/// One generated posting request.
#[derive(Debug, Clone)]
struct PlannedPosting {
    account_id: AccountId,
    posting_type: PostingType,
    magnitude: Decimal,
}

/// Controls the simulation.
pub struct SimulationController {
    /// Engine under test.
    engine: Arc<SimEngine>,
    /// Random number generator.
    rng: StdRng,
    /// Accounts created during this run.
    accounts: Vec<AccountId>,
    /// Scenario account aliases.
    aliases: HashMap<String, AccountId>,
    /// Scenario posting labels.
    labels: HashMap<String, PostingId>,
    /// Simulation metrics.
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(engine: SimEngine, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            engine: Arc::new(engine),
            rng,
            accounts: Vec::new(),
            aliases: HashMap::new(),
            labels: HashMap::new(),
            metrics: SimulationMetrics::new(),
        }
    }

    /// Create `count` accounts with fresh document numbers.
    pub async fn initialize(&mut self, count: usize) -> anyhow::Result<()> {
        info!("Creating {} accounts", count);

        for _ in 0..count {
            let account = self.engine.create_account(&fresh_document()).await?;
            self.accounts.push(account.id);
        }

        Ok(())
    }

    /// Fire random postings with bounded concurrency.
    pub async fn run(&mut self, run: &RandomRun) -> anyhow::Result<Duration> {
        if self.accounts.len() < run.accounts {
            let missing = run.accounts - self.accounts.len();
            self.initialize(missing).await?;
        }
        if self.accounts.is_empty() {
            return Err(anyhow::anyhow!("random run needs at least one account"));
        }

        let planned: Vec<PlannedPosting> = (0..run.postings)
            .map(|_| self.plan_posting(run.credit_ratio))
            .collect();

        info!(
            postings = run.postings,
            concurrency = run.concurrency,
            credit_ratio = run.credit_ratio,
            "Running random postings"
        );

        let start = Instant::now();
        let engine = self.engine.clone();
        let outcomes: Vec<(PostingClass, Result<(), LedgerError>, Duration)> = stream::iter(planned)
            .map(|p| {
                let engine = engine.clone();
                async move {
                    let started = Instant::now();
                    let result = engine
                        .post_operation(p.account_id, i32::from(p.posting_type.code()), p.magnitude)
                        .await
                        .map(|_| ());
                    (p.posting_type.class(), result, started.elapsed())
                }
            })
            .buffer_unordered(run.concurrency.max(1))
            .collect()
            .await;
        let elapsed = start.elapsed();

        for (class, result, latency) in outcomes {
            match result {
                Ok(()) => self.metrics.record_posted(class, latency),
                Err(e) => {
                    warn!(error = %e, code = e.error_code(), "Posting failed");
                    self.metrics.record_failed(&e);
                }
            }
        }

        Ok(elapsed)
    }

    /// Run a scenario. Fails on the first unmet assertion.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        info!("Scenario {} passed", scenario.name);
        Ok(())
    }

    /// Check ledger invariants on every account touched by this run.
    pub async fn verify(&self) -> anyhow::Result<Vec<Violation>> {
        verify_accounts(&*self.engine, &self.accounts).await
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// The engine under test.
    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    fn plan_posting(&mut self, credit_ratio: f64) -> PlannedPosting {
        let account_id = self.accounts[self.rng.gen_range(0..self.accounts.len())];
        let posting_type = if self.rng.gen_bool(credit_ratio.clamp(0.0, 1.0)) {
            PostingType::CreditVoucher
        } else {
            let debits = [
                PostingType::NormalPurchase,
                PostingType::InstallmentPurchase,
                PostingType::Withdrawal,
            ];
            debits[self.rng.gen_range(0..debits.len())]
        };
        let magnitude = Decimal::new(self.rng.gen_range(1..100_000), 2);

        PlannedPosting {
            account_id,
            posting_type,
            magnitude,
        }
    }

    fn account(&self, alias: &str) -> anyhow::Result<AccountId> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown account alias: {}", alias))
    }

    async fn remaining(&self, label: &str) -> anyhow::Result<Decimal> {
        let posting_id = self
            .labels
            .get(label)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown posting label: {}", label))?;
        Ok(self.engine.get_posting(posting_id).await?.remaining_balance)
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::CreateAccount { account } => {
                let created = self.engine.create_account(&fresh_document()).await?;
                info!("Account {} created as {}", account, created.id);
                self.accounts.push(created.id);
                self.aliases.insert(account.clone(), created.id);
            }
            ScenarioStep::Post {
                account,
                posting_type,
                amount,
                label,
            } => {
                let account_id = self.account(account)?;
                let started = Instant::now();
                let result = self
                    .engine
                    .post_operation(account_id, i32::from(posting_type.code()), *amount)
                    .await?;
                self.metrics.record_posted(posting_type.class(), started.elapsed());
                self.labels.insert(label.clone(), result.posting_id);
            }
            ScenarioStep::PostConcurrently {
                account,
                posting_type,
                amount,
                labels,
            } => {
                let account_id = self.account(account)?;
                let code = i32::from(posting_type.code());

                let handles: Vec<_> = labels
                    .iter()
                    .map(|label| {
                        let engine = self.engine.clone();
                        let label = label.clone();
                        let amount = *amount;
                        tokio::spawn(async move {
                            let started = Instant::now();
                            let result = engine.post_operation(account_id, code, amount).await;
                            (label, result, started.elapsed())
                        })
                    })
                    .collect();

                for handle in handles {
                    let (label, result, latency) = handle.await?;
                    let result = result?;
                    self.metrics.record_posted(posting_type.class(), latency);
                    self.labels.insert(label, result.posting_id);
                }
            }
            ScenarioStep::Assert { condition } => self.check(condition).await?,
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::RemainingEquals { label, expected } => {
                let actual = self.remaining(label).await?;
                if actual != *expected {
                    return Err(anyhow::anyhow!(
                        "posting {}: expected remaining balance {}, found {}",
                        label,
                        expected,
                        actual
                    ));
                }
            }
            AssertCondition::RemainingSetEquals { labels, expected } => {
                let mut actual = Vec::with_capacity(labels.len());
                for label in labels {
                    actual.push(self.remaining(label).await?);
                }
                let mut expected = expected.clone();
                actual.sort();
                expected.sort();
                if actual != expected {
                    return Err(anyhow::anyhow!(
                        "postings {:?}: expected remaining balances {:?}, found {:?}",
                        labels,
                        expected,
                        actual
                    ));
                }
            }
            AssertCondition::OutstandingDebtEquals { account, expected } => {
                let position = self.engine.account_position(self.account(account)?).await?;
                if position.outstanding_debt != *expected {
                    return Err(anyhow::anyhow!(
                        "account {}: expected outstanding debt {}, found {}",
                        account,
                        expected,
                        position.outstanding_debt
                    ));
                }
            }
        }
        info!("Assertion passed: {:?}", condition);
        Ok(())
    }
}

fn fresh_document() -> String {
    format!("sim-{}", Uuid::new_v4().simple())
}
