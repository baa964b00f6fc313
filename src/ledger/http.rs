use std::time::Duration;

use audit_chain::EntryHash;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::StatusCode;
use rocket::serde::json::serde_json;
use rocket::tokio::{sync::Mutex, time::sleep};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::model::mongodb::Id;

use super::{
    AnchorInfo, CandidateVotes, LedgerCandidate, LedgerClient, LedgerError, LedgerResult,
    TransactionReceipt, TxStatus,
};

type HmacSha256 = Hmac<Sha256>;

/// Client for the ledger relayer gateway.
///
/// The gateway holds the custodial signing identity's chain keys; we
/// authenticate to it by HMAC-signing each transaction body with the shared
/// relayer key. Submissions block until the gateway reports finality.
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
    relayer_key: Vec<u8>,
    retries: u32,
    backoff: Duration,
    /// Next nonce for the relayer identity. All submissions serialize on
    /// this lock: one shared signing identity means one nonce sequence.
    nonce: Mutex<u64>,
}

impl HttpLedgerClient {
    /// Connect to the gateway and fetch the relayer's current nonce.
    pub async fn connect(config: &Config) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.ledger_timeout())
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let client = Self {
            http,
            base_url: config.ledger_url().trim_end_matches('/').to_string(),
            relayer_key: config.relayer_key().to_vec(),
            retries: config.ledger_retries(),
            backoff: config.ledger_backoff(),
            nonce: Mutex::new(0),
        };

        let response: NonceResponse = client.get_json("/relayer/nonce".to_string()).await?;
        *client.nonce.lock().await = response.nonce;
        info!(
            "Connected to ledger gateway at {} (relayer nonce {})",
            client.base_url, response.nonce
        );

        Ok(client)
    }

    /// Submit a signed transaction, retrying transient failures with
    /// exponential backoff. Holds the nonce lock for the whole submission so
    /// concurrent callers cannot interleave nonces.
    async fn submit(
        &self,
        election_id: Id,
        kind: TransactionKind,
    ) -> LedgerResult<TransactionReceipt> {
        let mut nonce = self.nonce.lock().await;
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            let request = TransactionRequest {
                nonce: *nonce,
                kind: &kind,
            };
            let payload =
                serde_json::to_vec(&request).expect("Serialisation is infallible");
            let signature = sign(&self.relayer_key, &payload);

            match self.post_transaction(election_id, payload, signature).await {
                Ok(receipt) => {
                    // A mined transaction consumes the nonce even if it reverted.
                    *nonce += 1;
                    return match receipt.status {
                        TxStatus::Finalized => Ok(receipt),
                        TxStatus::Failed => Err(LedgerError::Rejected(
                            receipt
                                .reason
                                .unwrap_or_else(|| "transaction reverted".to_string()),
                        )),
                    };
                }
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Ledger submission attempt {attempt}/{} failed, retrying in {delay:?}: {err}",
                        self.retries
                    );
                    let jitter = {
                        let mut rng = rand::thread_rng();
                        Duration::from_millis(rng.gen_range(0..=delay.as_millis() as u64 / 4))
                    };
                    sleep(delay + jitter).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One transaction POST. Transport failures and gateway errors map onto
    /// the retryable/terminal split; the caller interprets the receipt.
    async fn post_transaction(
        &self,
        election_id: Id,
        payload: Vec<u8>,
        signature: String,
    ) -> LedgerResult<TransactionReceipt> {
        let url = format!("{}/elections/{}/transactions", self.base_url, election_id);
        let response = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .header("x-relayer-signature", signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LedgerError::Unavailable(format!("gateway returned {status}")));
        }
        if status.is_client_error() {
            // The gateway refused the transaction without mining it.
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{status}: {body}")));
        }
        response
            .json::<TransactionReceipt>()
            .await
            .map_err(|e| LedgerError::BadResponse(e.to_string()))
    }

    /// GET a JSON resource from the gateway.
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: String) -> LedgerResult<T> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Unavailable(format!("gateway returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::BadResponse(e.to_string()))
    }
}

#[rocket::async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn register_candidate(&self, name: &str, election_id: Id) -> LedgerResult<u64> {
        let receipt = self
            .submit(
                election_id,
                TransactionKind::RegisterCandidate {
                    name: name.to_string(),
                },
            )
            .await?;
        receipt.registered_candidate().ok_or_else(|| {
            LedgerError::BadResponse(format!(
                "transaction {} emitted no candidate-registered event",
                receipt.transaction
            ))
        })
    }

    async fn cast_vote(
        &self,
        candidate: u64,
        election_id: Id,
    ) -> LedgerResult<TransactionReceipt> {
        self.submit(election_id, TransactionKind::CastVote { candidate })
            .await
    }

    async fn tally(&self, election_id: Id) -> LedgerResult<Vec<CandidateVotes>> {
        self.get_json(format!("/elections/{}/tally", election_id))
            .await
    }

    async fn candidate_count(&self, election_id: Id) -> LedgerResult<u64> {
        let response: CountResponse = self
            .get_json(format!("/elections/{}/candidates/count", election_id))
            .await?;
        Ok(response.count)
    }

    async fn candidate(&self, election_id: Id, index: u64) -> LedgerResult<LedgerCandidate> {
        self.get_json(format!("/elections/{}/candidates/{}", election_id, index))
            .await
    }

    async fn anchor_root(
        &self,
        election_id: Id,
        root: EntryHash,
        entries: u64,
    ) -> LedgerResult<TransactionReceipt> {
        self.submit(election_id, TransactionKind::AnchorRoot { root, entries })
            .await
    }

    async fn latest_anchor(&self, election_id: Id) -> LedgerResult<Option<AnchorInfo>> {
        let response = self
            .http
            .get(format!(
                "{}/elections/{}/anchors/latest",
                self.base_url, election_id
            ))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        // No checkpoint published yet.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Unavailable(format!("gateway returned {status}")));
        }
        response
            .json::<AnchorInfo>()
            .await
            .map(Some)
            .map_err(|e| LedgerError::BadResponse(e.to_string()))
    }
}

/// HMAC-SHA256 over the exact request bytes, hex encoded.
fn sign(key: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload);
    HEXLOWER.encode(&mac.finalize().into_bytes())
}

/// The transaction methods the gateway accepts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
enum TransactionKind {
    CastVote { candidate: u64 },
    RegisterCandidate { name: String },
    AnchorRoot { root: EntryHash, entries: u64 },
}

/// A transaction body as posted to the gateway.
#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    nonce: u64,
    #[serde(flatten)]
    kind: &'a TransactionKind,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}
