use super::{MonzoAccount, MonzoAccountId, Pot, PotId, PotWriter, TransferDirection, TransferOutcome};
use crate::credentials::Provider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

const PROVIDER: Provider = Provider::Monzo;

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<MonzoAccount>,
}

#[derive(Deserialize)]
struct PotsResponse {
    pots: Vec<Pot>,
}

/// HTTP client for the Monzo API.
pub struct MonzoClient {
    http_client: Client,
    base_url: String,
}

impl MonzoClient {
    pub fn new(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// `"{action}-{epoch ms}-{random}"`, unique per transfer attempt.
fn new_dedupe_id(direction: TransferDirection) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!(
        "{}-{}-{:08x}",
        direction.action(),
        Utc::now().timestamp_millis(),
        suffix
    )
}

/// Maps non-2xx read responses: 401 means the token was rejected, anything
/// else is an upstream failure carrying the body.
async fn check_read_status(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(Error::Authorization { provider: PROVIDER }),
        s if !s.is_success() => {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            Err(Error::Upstream {
                provider: PROVIDER,
                status: Some(s.as_u16()),
                body,
            })
        }
        _ => Ok(response),
    }
}

#[async_trait]
impl PotWriter for MonzoClient {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<MonzoAccount>> {
        let response = self
            .http_client
            .get(format!("{}/accounts", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?;

        let response = check_read_status(response).await?;
        Ok(response
            .json::<AccountsResponse>()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?
            .accounts)
    }

    async fn list_pots(
        &self,
        access_token: &str,
        current_account_id: Option<&MonzoAccountId>,
    ) -> Result<Vec<Pot>> {
        let mut request = self
            .http_client
            .get(format!("{}/pots", self.base_url))
            .bearer_auth(access_token);
        if let Some(account_id) = current_account_id {
            request = request.query(&[("current_account_id", account_id.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?;

        let response = check_read_status(response).await?;
        Ok(response
            .json::<PotsResponse>()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?
            .pots)
    }

    async fn get_pot_by_id(&self, access_token: &str, pot_id: &PotId) -> Result<Option<Pot>> {
        let response = self
            .http_client
            .get(format!(
                "{}/pots/{}",
                self.base_url,
                urlencoding::encode(pot_id.as_str())
            ))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_read_status(response).await?;
        let pot = response
            .json::<Pot>()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?;
        Ok(Some(pot))
    }

    async fn transfer(
        &self,
        access_token: &str,
        account_id: &MonzoAccountId,
        pot_id: &PotId,
        amount_minor_units: i64,
    ) -> Result<TransferOutcome> {
        let Some(direction) = TransferDirection::for_amount(amount_minor_units) else {
            info!(pot_id = %pot_id, "Zero transfer requested, nothing to do");
            return Ok(TransferOutcome::NoOp);
        };

        let amount = amount_minor_units.checked_abs().ok_or_else(|| Error::Transfer {
            status: None,
            body: format!("amount {} out of range", amount_minor_units),
        })?;
        let dedupe_id = new_dedupe_id(direction);
        let account_field = match direction {
            TransferDirection::Deposit => "source_account_id",
            TransferDirection::Withdraw => "destination_account_id",
        };
        let amount_field = amount.to_string();
        let form = [
            (account_field, account_id.as_str()),
            ("amount", amount_field.as_str()),
            ("dedupe_id", dedupe_id.as_str()),
        ];

        info!(
            pot_id = %pot_id,
            direction = %direction,
            amount_minor_units = amount,
            dedupe_id = %dedupe_id,
            "Submitting pot transfer"
        );

        let response = self
            .http_client
            .put(format!(
                "{}/pots/{}/{}",
                self.base_url,
                urlencoding::encode(pot_id.as_str()),
                direction.action()
            ))
            .bearer_auth(access_token)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                // Outcome unknown: the request may or may not have reached the ledger
                warn!(pot_id = %pot_id, dedupe_id = %dedupe_id, error = %e, "Transfer request failed");
                Error::Transfer {
                    status: e.status().map(|s| s.as_u16()),
                    body: e.to_string(),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::Transfer {
                status: Some(status.as_u16()),
                body,
            });
        }

        Ok(TransferOutcome::Completed {
            direction,
            pot_id: pot_id.clone(),
            amount_minor_units: amount,
            dedupe_id,
        })
    }
}
