//! Horizon REST client
//!
//! Implements [`LedgerClient`] against a Horizon server over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{
    AccountState, Asset, Balance, ClaimableBalance, FeeStats, LedgerClient, LedgerError,
    SignedTransaction, SubmitFailure,
};
use crate::amount::Amount;

/// Horizon API client
pub struct HorizonClient {
    client: reqwest::Client,
    base_url: String,
}

impl HorizonClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LedgerError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LedgerError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Network(format!("{} {}: {}", status, path, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))
    }

    /// Most recent transactions of an account, newest first, with their
    /// operations. A transaction whose operations cannot be fetched is kept
    /// with an empty list and the error.
    pub async fn recent_transactions(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<TransactionSummary>, LedgerError> {
        let page: Page<TransactionRecord> = self
            .get_json(
                &format!("/accounts/{}/transactions", account_id),
                &[("limit", limit.to_string()), ("order", "desc".to_string())],
            )
            .await?;

        let mut transactions = Vec::with_capacity(page.embedded.records.len());
        for record in page.embedded.records {
            let (operations, error) = match self.transaction_operations(&record.hash).await {
                Ok(operations) => (operations, None),
                Err(e) => {
                    debug!("Operations of {} unavailable: {}", record.hash, e);
                    (Vec::new(), Some(e.to_string()))
                }
            };
            transactions.push(TransactionSummary {
                id: record.id,
                hash: record.hash,
                created_at: record.created_at,
                operation_count: record.operation_count,
                successful: record.successful,
                operations,
                error,
            });
        }
        Ok(transactions)
    }

    async fn transaction_operations(&self, hash: &str) -> Result<Vec<OperationSummary>, LedgerError> {
        let page: Page<OperationRecord> = self
            .get_json(&format!("/transactions/{}/operations", hash), &[])
            .await?;

        page.embedded
            .records
            .into_iter()
            .map(OperationRecord::into_summary)
            .collect()
    }
}

/// Summary line of a past transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub id: String,
    pub hash: String,
    pub created_at: String,
    pub operation_count: u32,
    pub successful: bool,
    pub operations: Vec<OperationSummary>,
    /// Why `operations` is empty, if fetching them failed
    pub error: Option<String>,
}

/// One operation of a past transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub kind: String,
    pub amount: Option<Amount>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub asset: Option<Asset>,
}

// =============================================================================
// Response bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(rename = "_embedded")]
    embedded: Embedded<T>,
}

#[derive(Debug, Deserialize)]
struct Embedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account_id: String,
    sequence: String,
    balances: Vec<BalanceLine>,
}

#[derive(Debug, Deserialize)]
struct BalanceLine {
    balance: String,
    asset_type: String,
    asset_code: Option<String>,
    asset_issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaimableBalanceRecord {
    id: String,
    asset: String,
    amount: String,
    #[serde(default)]
    claimants: Vec<ClaimantRecord>,
}

#[derive(Debug, Deserialize)]
struct ClaimantRecord {
    destination: String,
    #[serde(default)]
    predicate: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FeeStatsResponse {
    fee_charged: FeeCharged,
}

#[derive(Debug, Deserialize)]
struct FeeCharged {
    p95: String,
    p99: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Debug, Deserialize, Default)]
struct ProblemResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extras: Option<ProblemExtras>,
}

#[derive(Debug, Deserialize)]
struct ProblemExtras {
    result_codes: Option<ResultCodes>,
}

#[derive(Debug, Deserialize)]
struct ResultCodes {
    transaction: Option<String>,
    #[serde(default)]
    operations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionRecord {
    id: String,
    hash: String,
    created_at: String,
    operation_count: u32,
    successful: bool,
}

#[derive(Debug, Deserialize)]
struct OperationRecord {
    #[serde(rename = "type")]
    kind: String,
    amount: Option<String>,
    from: Option<String>,
    to: Option<String>,
    destination: Option<String>,
    asset_type: Option<String>,
    asset_code: Option<String>,
    asset_issuer: Option<String>,
}

impl OperationRecord {
    fn into_summary(self) -> Result<OperationSummary, LedgerError> {
        let asset = match (self.asset_type.as_deref(), self.asset_code, self.asset_issuer) {
            (Some("native"), _, _) => Some(Asset::Native),
            (Some(_), Some(code), Some(issuer)) => Some(Asset::Credit { code, issuer }),
            _ => None,
        };
        Ok(OperationSummary {
            kind: self.kind,
            amount: self.amount.as_deref().map(parse_amount).transpose()?,
            from: self.from,
            to: self.to.or(self.destination),
            asset,
        })
    }
}

fn parse_amount(raw: &str) -> Result<Amount, LedgerError> {
    raw.parse()
        .map_err(|e: crate::amount::ParseAmountError| LedgerError::Parse(e.to_string()))
}

fn parse_u64(raw: &str, what: &str) -> Result<u64, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::Parse(format!("{} '{}' is not an integer", what, raw)))
}

impl BalanceLine {
    fn into_balance(self) -> Result<Balance, LedgerError> {
        let asset = if self.asset_type == "native" {
            Asset::Native
        } else {
            match (self.asset_code, self.asset_issuer) {
                (Some(code), Some(issuer)) => Asset::Credit { code, issuer },
                _ => {
                    return Err(LedgerError::Parse(format!(
                        "balance of type {} without code/issuer",
                        self.asset_type
                    )))
                }
            }
        };
        Ok(Balance {
            asset,
            amount: parse_amount(&self.balance)?,
            asset_type: self.asset_type,
        })
    }
}

/// Unlock time from a `{"not": {"abs_before": ...}}` predicate
fn unlock_time(predicate: &serde_json::Value) -> Option<DateTime<Utc>> {
    let abs_before = predicate.get("not")?.get("abs_before")?.as_str()?;
    DateTime::parse_from_rfc3339(abs_before)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl ClaimableBalanceRecord {
    fn into_claimable(self, claimant: &str) -> Result<ClaimableBalance, LedgerError> {
        let unlock_time = self
            .claimants
            .iter()
            .filter(|c| c.destination == claimant)
            .find_map(|c| unlock_time(&c.predicate));

        Ok(ClaimableBalance {
            asset: Asset::parse_canonical(&self.asset)?,
            amount: parse_amount(&self.amount)?,
            id: self.id,
            unlock_time,
        })
    }
}

#[async_trait]
impl LedgerClient for HorizonClient {
    async fn load_account(&self, public_key: &str) -> Result<AccountState, LedgerError> {
        let account: AccountResponse = self
            .get_json(&format!("/accounts/{}", public_key), &[])
            .await
            .map_err(|e| match e {
                LedgerError::NotFound(_) => LedgerError::NotFound(public_key.to_string()),
                other => other,
            })?;

        let sequence = account
            .sequence
            .parse::<i64>()
            .map_err(|_| LedgerError::Parse(format!("sequence '{}'", account.sequence)))?;
        let balances = account
            .balances
            .into_iter()
            .map(BalanceLine::into_balance)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AccountState {
            account_id: account.account_id,
            sequence,
            balances,
        })
    }

    async fn list_claimable_balances(
        &self,
        claimant: &str,
        limit: u32,
    ) -> Result<Vec<ClaimableBalance>, LedgerError> {
        let page: Page<ClaimableBalanceRecord> = self
            .get_json(
                "/claimable_balances",
                &[("claimant", claimant.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        page.embedded
            .records
            .into_iter()
            .map(|record| record.into_claimable(claimant))
            .collect()
    }

    async fn fee_stats(&self) -> Result<FeeStats, LedgerError> {
        let stats: FeeStatsResponse = self.get_json("/fee_stats", &[]).await?;
        Ok(FeeStats {
            p95: parse_u64(&stats.fee_charged.p95, "fee_charged.p95")?,
            p99: parse_u64(&stats.fee_charged.p99, "fee_charged.p99")?,
        })
    }

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<String, LedgerError> {
        debug!("Submitting tx {} ({})", tx.hash, tx.intent);

        let response = self
            .client
            .post(self.url("/transactions"))
            .form(&[("tx", tx.envelope.as_str())])
            .send()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: SubmitResponse = response
                .json()
                .await
                .map_err(|e| LedgerError::Parse(e.to_string()))?;
            return Ok(body.hash);
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Network(format!("{}: {}", status, body)));
        }

        let problem: ProblemResponse = response.json().await.unwrap_or_default();
        let (transaction, operations) = match problem.extras.and_then(|e| e.result_codes) {
            Some(codes) => (codes.transaction, codes.operations),
            None => (None, Vec::new()),
        };
        let failure = SubmitFailure::from_result_codes(transaction.as_deref(), &operations);

        Err(LedgerError::Submission {
            failure,
            message: if problem.title.is_empty() {
                status.to_string()
            } else {
                problem.title
            },
        })
    }
}
