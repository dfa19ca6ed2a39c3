use super::{decide, to_minor_units, Decision, PlanOutcome, PlanReport, RunReport, UserReport};
use crate::config::ReconcileConfig;
use crate::credentials::{CredentialStore, Provider};
use crate::error::{Error, Result};
use crate::monzo::{PotId, PotWriter, TransferDirection, TransferOutcome};
use crate::oauth::TokenManager;
use crate::rules::{AutomationRule, RuleStore};
use crate::truelayer::{Account, AccountReader, AccountType, AggregatorAccountId};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum CardSelection {
    All,
    Only(Vec<AggregatorAccountId>),
}

enum PotTarget {
    /// Savings pot whose name carries a configured marker.
    Marker,
    Rule { pot_id: PotId, pot_name: String },
}

/// One unit of reconciliation work for a user.
struct Plan {
    rule_id: Option<Uuid>,
    cards: CardSelection,
    source_account: Option<AggregatorAccountId>,
    pot: PotTarget,
    minimum_balance: i64,
}

impl Plan {
    fn default_plan() -> Self {
        Self {
            rule_id: None,
            cards: CardSelection::All,
            source_account: None,
            pot: PotTarget::Marker,
            minimum_balance: 0,
        }
    }

    fn from_rule(rule: &AutomationRule) -> Self {
        Self {
            rule_id: Some(rule.id),
            cards: CardSelection::Only(
                rule.credit_cards
                    .iter()
                    .map(|c| c.account_id.clone())
                    .collect(),
            ),
            source_account: Some(rule.source_account.account_id.clone()),
            pot: PotTarget::Rule {
                pot_id: rule.target_pot.pot_id.clone(),
                pot_name: rule.target_pot.pot_name.clone(),
            },
            minimum_balance: rule.minimum_bank_balance,
        }
    }
}

fn skipped(reason: impl Into<String>) -> PlanOutcome {
    PlanOutcome::Skipped {
        reason: reason.into(),
    }
}

/// Runs one reconciliation pass over every user with a live credential.
pub struct ReconcileJob {
    credentials: Arc<CredentialStore>,
    rules: Arc<RuleStore>,
    tokens: Arc<TokenManager>,
    reader: Arc<dyn AccountReader>,
    writer: Arc<dyn PotWriter>,
    config: ReconcileConfig,
}

impl ReconcileJob {
    pub fn new(
        credentials: Arc<CredentialStore>,
        rules: Arc<RuleStore>,
        tokens: Arc<TokenManager>,
        reader: Arc<dyn AccountReader>,
        writer: Arc<dyn PotWriter>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            credentials,
            rules,
            tokens,
            reader,
            writer,
            config,
        }
    }

    /// Reconciles every user once.
    ///
    /// Per-user failures are recorded in the report and never stop other
    /// users. Only a failure to enumerate users fails the run.
    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let users = self.credentials.list_users().map_err(Error::Storage)?;
        info!(users = users.len(), "Starting reconciliation run");

        let concurrency = self.config.max_concurrent_users.max(1);
        let mut users: Vec<UserReport> = stream::iter(users)
            .map(|user_id| self.reconcile_user(user_id))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let report = RunReport { started_at, users };
        info!(
            users = report.users.len(),
            transfers = report.transfer_count(),
            failed_users = report.failed_users(),
            "Reconciliation run finished"
        );
        Ok(report)
    }

    async fn reconcile_user(&self, user_id: String) -> UserReport {
        match self.process_user(&user_id).await {
            Ok(plans) => UserReport {
                user_id,
                plans,
                error: None,
            },
            Err(e) => {
                if e.is_reauthorization_required() {
                    warn!(user_id = %user_id, error = %e, "User must reauthorize, skipping");
                } else {
                    error!(user_id = %user_id, error = %e, "Reconciliation failed for user");
                }
                UserReport {
                    user_id,
                    plans: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }

    async fn process_user(&self, user_id: &str) -> Result<Vec<PlanReport>> {
        let rules = self
            .rules
            .list_active_for_user(user_id)
            .map_err(Error::Storage)?;
        let plans: Vec<Plan> = if rules.is_empty() {
            vec![Plan::default_plan()]
        } else {
            rules.iter().map(Plan::from_rule).collect()
        };

        let accounts = self.reader.list_accounts(user_id).await?;

        let mut reports = Vec::with_capacity(plans.len());
        for plan in &plans {
            let outcome = self.execute_plan(user_id, plan, &accounts).await;
            match &outcome {
                Ok(outcome) => {
                    debug!(user_id = %user_id, rule_id = ?plan.rule_id, outcome = ?outcome, "Plan finished")
                }
                Err(e) => {
                    error!(user_id = %user_id, rule_id = ?plan.rule_id, error = %e, "Plan failed")
                }
            }
            reports.push(PlanReport {
                rule_id: plan.rule_id,
                outcome,
            });
        }
        Ok(reports)
    }

    async fn execute_plan(&self, user_id: &str, plan: &Plan, accounts: &[Account]) -> Result<PlanOutcome> {
        let Some(card_total) = self.card_total(user_id, &plan.cards).await? else {
            return Ok(skipped("no card balance could be read"));
        };

        let Some(main) = self.find_main_account(plan, accounts) else {
            info!(user_id = %user_id, "No main account found, skipping");
            return Ok(skipped("main account not found"));
        };
        let Some(pot_account) = self.find_pot_account(plan, accounts) else {
            info!(user_id = %user_id, "No credit card pot found, skipping");
            return Ok(skipped("credit card pot not found"));
        };

        let Some(main_balance) = self.reader.account_balance(user_id, &main.account_id).await? else {
            return Ok(skipped("main account balance unavailable"));
        };
        let Some(pot_balance) = self.reader.account_balance(user_id, &pot_account.account_id).await? else {
            return Ok(skipped("pot balance unavailable"));
        };

        let main_available = to_minor_units(main_balance.available_or_current());
        let pot_minor = to_minor_units(pot_balance.current);

        match decide(
            card_total,
            pot_minor,
            main_available,
            plan.minimum_balance,
            self.config.dead_band_minor_units,
        ) {
            Decision::NoChange { difference } => {
                info!(
                    user_id = %user_id,
                    card_total,
                    pot_balance = pot_minor,
                    difference,
                    "Pot already covers card balances"
                );
                Ok(PlanOutcome::NoChange {
                    difference_minor_units: difference,
                })
            }
            Decision::InsufficientFunds {
                required,
                available,
                minimum_balance,
            } => {
                warn!(
                    user_id = %user_id,
                    required,
                    available,
                    minimum_balance,
                    "Insufficient funds for deposit, skipping"
                );
                Ok(PlanOutcome::InsufficientFunds {
                    required_minor_units: required,
                    available_minor_units: available,
                    minimum_balance_minor_units: minimum_balance,
                })
            }
            Decision::Transfer { amount } => self.execute_transfer(user_id, plan, amount).await,
        }
    }

    /// Sums card balances. Cards whose balance cannot be read are skipped;
    /// returns `None` when there were cards but none could be read.
    async fn card_total(&self, user_id: &str, selection: &CardSelection) -> Result<Option<i64>> {
        let card_ids: Vec<AggregatorAccountId> = match selection {
            CardSelection::All => self
                .reader
                .list_cards(user_id)
                .await?
                .into_iter()
                .map(|card| card.account_id)
                .collect(),
            CardSelection::Only(ids) => ids.clone(),
        };

        let mut total = 0;
        let mut read = 0;
        for card_id in &card_ids {
            match self.reader.card_balance(user_id, card_id).await {
                Ok(Some(balance)) => {
                    total += to_minor_units(balance.current);
                    read += 1;
                }
                Ok(None) => {
                    warn!(user_id = %user_id, card_id = %card_id, "No balance reported for card, skipping");
                }
                Err(e @ Error::Upstream { .. }) => {
                    warn!(user_id = %user_id, card_id = %card_id, error = %e, "Card balance unavailable, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        if read == 0 && !card_ids.is_empty() {
            return Ok(None);
        }
        debug!(user_id = %user_id, cards = read, total, "Summed card balances");
        Ok(Some(total))
    }

    fn find_main_account<'a>(&self, plan: &Plan, accounts: &'a [Account]) -> Option<&'a Account> {
        match &plan.source_account {
            Some(id) => accounts.iter().find(|a| &a.account_id == id),
            None => accounts
                .iter()
                .find(|a| a.account_type == AccountType::Transaction && a.provider.is_monzo()),
        }
    }

    fn find_pot_account<'a>(&self, plan: &Plan, accounts: &'a [Account]) -> Option<&'a Account> {
        match &plan.pot {
            PotTarget::Rule { pot_name, .. } => {
                let wanted = pot_name.to_lowercase();
                accounts
                    .iter()
                    .find(|a| a.display_name.to_lowercase() == wanted)
            }
            PotTarget::Marker => accounts.iter().find(|a| {
                a.account_type == AccountType::Savings
                    && a.provider.is_monzo()
                    && self.matches_marker(&a.display_name)
            }),
        }
    }

    fn matches_marker(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.config
            .pot_markers
            .iter()
            .any(|marker| name.contains(&marker.to_lowercase()))
    }

    async fn execute_transfer(&self, user_id: &str, plan: &Plan, amount: i64) -> Result<PlanOutcome> {
        let Some(direction) = TransferDirection::for_amount(amount) else {
            return Ok(PlanOutcome::NoChange {
                difference_minor_units: 0,
            });
        };

        let mut token = match self
            .tokens
            .get_valid_access_token(user_id, Provider::Monzo)
            .await
        {
            Ok(token) => token,
            Err(Error::NoCredential { .. }) => {
                info!(
                    user_id = %user_id,
                    amount_minor_units = amount.unsigned_abs(),
                    direction = %direction,
                    "Dry run: no Monzo grant, transfer not executed"
                );
                return Ok(PlanOutcome::DryRun {
                    amount_minor_units: amount,
                    direction,
                });
            }
            Err(e) => return Err(e),
        };

        let monzo_accounts = self
            .monzo_read(user_id, &mut token, |t| async move {
                self.writer.list_accounts(&t).await
            })
            .await?;
        let Some(main) = monzo_accounts
            .into_iter()
            .find(|a| a.is_main_current_account())
        else {
            warn!(user_id = %user_id, "No open Monzo current account, skipping");
            return Ok(skipped("Monzo current account not found"));
        };

        let pot = match &plan.pot {
            PotTarget::Rule { pot_id, .. } => self
                .monzo_read(user_id, &mut token, |t| async move {
                    self.writer.get_pot_by_id(&t, pot_id).await
                })
                .await?
                .filter(|pot| !pot.deleted),
            PotTarget::Marker => {
                let main_id = &main.id;
                self.monzo_read(user_id, &mut token, |t| async move {
                    self.writer.list_pots(&t, Some(main_id)).await
                })
                .await?
                .into_iter()
                .find(|pot| !pot.deleted && self.matches_marker(&pot.name))
            }
        };
        let Some(pot) = pot else {
            warn!(user_id = %user_id, "Credit card pot not found on Monzo, skipping");
            return Ok(skipped("Monzo pot not found"));
        };

        match self.writer.transfer(&token, &main.id, &pot.id, amount).await {
            Ok(TransferOutcome::NoOp) => Ok(PlanOutcome::NoChange {
                difference_minor_units: 0,
            }),
            Ok(TransferOutcome::Completed {
                direction,
                dedupe_id,
                ..
            }) => {
                info!(
                    user_id = %user_id,
                    pot_id = %pot.id,
                    amount_minor_units = amount.unsigned_abs(),
                    direction = %direction,
                    dedupe_id = %dedupe_id,
                    "Pot transfer completed"
                );
                Ok(PlanOutcome::Transferred {
                    amount_minor_units: amount,
                    direction,
                    dedupe_id,
                })
            }
            Err(e) => {
                error!(user_id = %user_id, pot_id = %pot.id, error = %e, "Pot transfer failed");
                Err(e)
            }
        }
    }

    /// Runs a Monzo read, refreshing once if the token is rejected.
    async fn monzo_read<T, F, Fut>(&self, user_id: &str, token: &mut String, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match call(token.clone()).await {
            Err(Error::Authorization { .. }) => {
                warn!(user_id = %user_id, "Monzo rejected access token, refreshing");
                let fresh = self
                    .tokens
                    .force_refresh(user_id, Provider::Monzo, token.as_str())
                    .await?;
                *token = fresh;
                call(token.clone()).await
            }
            other => other,
        }
    }
}
