use super::{Account, AccountReader, AggregatorAccountId, Balance, Card};
use crate::credentials::Provider;
use crate::error::{Error, Result};
use crate::oauth::TokenManager;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const PROVIDER: Provider = Provider::TrueLayer;

/// Every Data API list endpoint wraps its payload in `results`.
#[derive(Deserialize)]
struct ResultsEnvelope<T> {
    results: Vec<T>,
}

/// HTTP client for the TrueLayer Data API.
///
/// Each call fetches a valid token from the [`TokenManager`]. A 401 triggers
/// exactly one forced refresh and one retry; a second 401 is terminal.
pub struct TrueLayerClient {
    tokens: Arc<TokenManager>,
    http_client: Client,
    base_url: String,
}

impl TrueLayerClient {
    pub fn new(tokens: Arc<TokenManager>, http_client: Client, base_url: String) -> Self {
        Self {
            tokens,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// GETs `path` and unwraps `results`. Returns `None` on 404.
    async fn get_results<T: DeserializeOwned>(&self, user_id: &str, path: &str) -> Result<Option<Vec<T>>> {
        let token = self.tokens.get_valid_access_token(user_id, PROVIDER).await?;
        let mut response = self.send(path, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(user_id = %user_id, path = %path, "TrueLayer rejected access token, refreshing");
            let fresh = self.tokens.force_refresh(user_id, PROVIDER, &token).await?;
            response = self.send(path, &fresh).await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                warn!(user_id = %user_id, path = %path, "TrueLayer rejected refreshed token");
                return Err(Error::Authorization { provider: PROVIDER });
            }
        }

        if response.status() == StatusCode::NOT_FOUND {
            debug!(user_id = %user_id, path = %path, "TrueLayer resource not found");
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::Upstream {
                provider: PROVIDER,
                status: Some(status.as_u16()),
                body,
            });
        }

        let envelope: ResultsEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))?;
        Ok(Some(envelope.results))
    }

    async fn send(&self, path: &str, access_token: &str) -> Result<Response> {
        self.http_client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::upstream(PROVIDER, e))
    }

    async fn balance(&self, user_id: &str, path: &str) -> Result<Option<Balance>> {
        Ok(self
            .get_results::<Balance>(user_id, path)
            .await?
            .and_then(|results| results.into_iter().next()))
    }
}

#[async_trait]
impl AccountReader for TrueLayerClient {
    async fn list_cards(&self, user_id: &str) -> Result<Vec<Card>> {
        Ok(self.get_results(user_id, "/cards").await?.unwrap_or_default())
    }

    async fn card_balance(&self, user_id: &str, account_id: &AggregatorAccountId) -> Result<Option<Balance>> {
        self.balance(
            user_id,
            &format!("/cards/{}/balance", urlencoding::encode(account_id.as_str())),
        )
            .await
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        Ok(self
            .get_results(user_id, "/accounts")
            .await?
            .unwrap_or_default())
    }

    async fn account_balance(
        &self,
        user_id: &str,
        account_id: &AggregatorAccountId,
    ) -> Result<Option<Balance>> {
        self.balance(
            user_id,
            &format!("/accounts/{}/balance", urlencoding::encode(account_id.as_str())),
        )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Tokens;
    use crate::truelayer::AccountType;
    use mockito::{Matcher, Server};

    fn client(tokens: &Tokens, server: &Server) -> TrueLayerClient {
        TrueLayerClient::new(Arc::clone(&tokens.manager), Client::new(), server.url())
    }

    #[tokio::test]
    async fn test_list_cards() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/cards")
            .match_header("authorization", "Bearer at_1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{
                    "account_id":"card-1",
                    "card_network":"VISA",
                    "card_type":"CREDIT",
                    "currency":"GBP",
                    "display_name":"Amex Gold",
                    "partial_card_number":"1234",
                    "provider":{"display_name":"AMEX","provider_id":"ob-amex"}
                }],"status":"Succeeded"}"#,
            )
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let cards = client(&tokens, &server).list_cards("user1").await.unwrap();

        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].account_id, AggregatorAccountId::new("card-1"));
        assert_eq!(cards[0].partial_card_number.as_deref(), Some("1234"));
        assert_eq!(cards[0].provider.provider_id, "ob-amex");
    }

    #[tokio::test]
    async fn test_list_accounts_parses_types() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/accounts")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[
                    {"account_id":"acc-main","account_type":"TRANSACTION","display_name":"Current Account",
                     "currency":"GBP","provider":{"provider_id":"ob-monzo"}},
                    {"account_id":"acc-pot","account_type":"SAVINGS","display_name":"Credit Card Pot",
                     "currency":"GBP","provider":{"provider_id":"ob-monzo"}},
                    {"account_id":"acc-biz","account_type":"BUSINESS_TRANSACTION","display_name":"Biz",
                     "provider":{"provider_id":"ob-monzo"}}
                ]}"#,
            )
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let accounts = client(&tokens, &server).list_accounts("user1").await.unwrap();

        let types: Vec<AccountType> = accounts.iter().map(|a| a.account_type.clone()).collect();
        assert_eq!(
            types,
            vec![AccountType::Transaction, AccountType::Savings, AccountType::Other]
        );
        assert!(accounts[0].provider.is_monzo());
    }

    #[tokio::test]
    async fn test_card_balance() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/cards/card-1/balance")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"available":3180.0,"currency":"GBP","current":120.0,
                    "credit_limit":3300.0,"update_timestamp":"2026-10-18T06:00:00Z"}]}"#,
            )
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let balance = client(&tokens, &server)
            .card_balance("user1", &AggregatorAccountId::new("card-1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(balance.current, 120.0);
        assert_eq!(balance.credit_limit, Some(3300.0));
        assert_eq!(balance.currency, "GBP");
    }

    #[tokio::test]
    async fn test_unauthorized_then_success_refreshes_once() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("GET", "/accounts/acc-1/balance")
            .match_header("authorization", "Bearer at_stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "rt_1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at_fresh","refresh_token":"rt_2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let retried = server
            .mock("GET", "/accounts/acc-1/balance")
            .match_header("authorization", "Bearer at_fresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[{"currency":"GBP","available":500.0,"current":480.0}]}"#)
            .expect(1)
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        // Locally the token still looks valid
        tokens.seed("user1", Provider::TrueLayer, "at_stale", Some("rt_1"));

        let balance = client(&tokens, &server)
            .account_balance("user1", &AggregatorAccountId::new("acc-1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(balance.available_or_current(), 500.0);
        rejected.assert_async().await;
        refresh.assert_async().await;
        retried.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_terminal() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("GET", "/cards")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at_fresh","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_stale", Some("rt_1"));

        let err = client(&tokens, &server).list_cards("user1").await.unwrap_err();

        assert!(matches!(err, Error::Authorization { provider: Provider::TrueLayer }));
        data.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_upstream_with_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/cards/card-9/balance")
            .with_status(501)
            .with_body(r#"{"error":"endpoint_not_supported"}"#)
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let err = client(&tokens, &server)
            .card_balance("user1", &AggregatorAccountId::new("card-9"))
            .await
            .unwrap_err();

        match err {
            Error::Upstream { status, body, .. } => {
                assert_eq!(status, Some(501));
                assert!(body.contains("endpoint_not_supported"));
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_balance_is_none() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/accounts/gone/balance")
            .with_status(404)
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let balance = client(&tokens, &server)
            .account_balance("user1", &AggregatorAccountId::new("gone"))
            .await
            .unwrap();
        assert!(balance.is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_skips_network() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", "/cards").expect(0).create_async().await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));

        let err = client(&tokens, &server).list_cards("nobody").await.unwrap_err();

        assert!(matches!(err, Error::NoCredential { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_account_id_is_escaped_in_path() {
        let mut server = Server::new_async().await;
        let escaped = server
            .mock("GET", "/accounts/acc%2F..%2Fcards%3Fx/balance")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[{"currency":"GBP","current":12.5}]}"#)
            .expect(1)
            .create_async()
            .await;
        let tokens = Tokens::new(&format!("{}/token", server.url()));
        tokens.seed("user1", Provider::TrueLayer, "at_1", Some("rt_1"));

        let balance = client(&tokens, &server)
            .account_balance("user1", &AggregatorAccountId::new("acc/../cards?x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(balance.current, 12.5);
        escaped.assert_async().await;
    }
}
