//! Solana ledger and wallet access routed through the RPC resilience layer

use async_trait::async_trait;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use solana_client::nonblocking::pubsub_client::{PubsubClient, PubsubClientError};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig};
use solana_client::rpc_response::{ProcessedSignatureResult, RpcSignatureResult};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};
use solana_transaction_status::TransactionStatus;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::execution::{LedgerGateway, SignatureOutcome};
use crate::domain::safety::WalletProbe;
use crate::infrastructure::rpc::{RpcEndpoint, RpcManager};
use crate::shared::errors::RpcError;
use crate::shared::types::Token;
use crate::shared::utils::raw_amount_to_decimal;

pub const WRAPPED_SOL_MINT: Pubkey = solana_sdk::pubkey!("So11111111111111111111111111111111111111112");
const LAMPORTS_PER_SOL_DECIMALS: u32 = 9;
/// Simulation log lines kept in a failure payload
const SIMULATION_LOG_TAIL: usize = 5;

pub struct SolanaGateway {
    rpc: Arc<RpcManager<RpcClient>>,
    owner: Pubkey,
    settlement: Token,
    token_program: Pubkey,
    commitment: CommitmentConfig,
}

impl SolanaGateway {
    pub fn new(
        rpc: Arc<RpcManager<RpcClient>>,
        owner: Pubkey,
        settlement: Token,
        token_program: Pubkey,
        commitment: CommitmentConfig,
    ) -> Self {
        Self {
            rpc,
            owner,
            settlement,
            token_program,
            commitment,
        }
    }

    pub fn rpc(&self) -> &Arc<RpcManager<RpcClient>> {
        &self.rpc
    }

    pub fn settlement_account(&self) -> Pubkey {
        get_associated_token_address_with_program_id(&self.owner, &self.settlement.mint, &self.token_program)
    }

    async fn lamports(&self) -> Result<u64, RpcError> {
        let owner = self.owner;
        self.rpc
            .execute_with_retry("get_balance", move |client: Arc<RpcClient>| async move {
                client.get_balance(&owner).await
            })
            .await
    }
}

/// Trivial health call used by the background prober
pub async fn probe_endpoint(client: Arc<RpcClient>) -> bool {
    client.get_health().await.is_ok()
}

fn signature_result(result: RpcSignatureResult) -> Option<SignatureOutcome> {
    match result {
        RpcSignatureResult::ProcessedSignature(ProcessedSignatureResult { err: None }) => {
            Some(SignatureOutcome::Confirmed)
        }
        RpcSignatureResult::ProcessedSignature(ProcessedSignatureResult { err: Some(err) }) => {
            Some(SignatureOutcome::Failed(format!("{:?}", err)))
        }
        RpcSignatureResult::ReceivedSignature(_) => None,
    }
}

/// Terminal outcome of a polled status, `None` while below `commitment`
fn status_outcome(status: &TransactionStatus, commitment: CommitmentConfig) -> Option<SignatureOutcome> {
    match &status.err {
        Some(err) => Some(SignatureOutcome::Failed(format!("{:?}", err))),
        None if status.satisfies_commitment(commitment) => Some(SignatureOutcome::Confirmed),
        None => None,
    }
}

#[async_trait]
impl LedgerGateway for SolanaGateway {
    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.rpc
            .execute_with_retry("get_latest_blockhash", |client: Arc<RpcClient>| async move {
                client.get_latest_blockhash().await
            })
            .await
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };
        let transaction = transaction.clone();
        self.rpc
            .execute_with_retry("send_transaction", move |client: Arc<RpcClient>| {
                let transaction = transaction.clone();
                let config = config.clone();
                async move { client.send_transaction_with_config(&transaction, config).await }
            })
            .await
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SignatureOutcome, RpcError> {
        let commitment = self.commitment;
        let transaction = transaction.clone();
        let response = self
            .rpc
            .execute_with_retry("simulate_transaction", move |client: Arc<RpcClient>| {
                let transaction = transaction.clone();
                let config = RpcSimulateTransactionConfig {
                    sig_verify: true,
                    commitment: Some(commitment),
                    ..RpcSimulateTransactionConfig::default()
                };
                async move { client.simulate_transaction_with_config(&transaction, config).await }
            })
            .await?;

        let result = response.value;
        if let Some(units) = result.units_consumed {
            debug!("Simulation consumed {} compute units", units);
        }
        Ok(match result.err {
            None => SignatureOutcome::Confirmed,
            Some(err) => {
                let logs = result.logs.unwrap_or_default();
                let tail = logs[logs.len().saturating_sub(SIMULATION_LOG_TAIL)..].join(" | ");
                SignatureOutcome::Failed(format!("{:?} logs: {}", err, tail))
            }
        })
    }

    async fn await_signature_notification(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<Option<SignatureOutcome>, RpcError> {
        let signature = *signature;
        let commitment = self.commitment;
        self.rpc
            .execute_with_failover("signature_subscribe", move |endpoint: Arc<RpcEndpoint<RpcClient>>| async move {
                let pubsub = PubsubClient::new(&endpoint.websocket_url()).await?;
                let config = RpcSignatureSubscribeConfig {
                    commitment: Some(commitment),
                    enable_received_notification: Some(false),
                };
                let (mut stream, unsubscribe) = pubsub.signature_subscribe(&signature, Some(config)).await?;

                let outcome = match tokio::time::timeout(timeout, stream.next()).await {
                    Ok(Some(response)) => signature_result(response.value),
                    Ok(None) => {
                        warn!("Signature stream for {} closed early", signature);
                        None
                    }
                    Err(_) => None,
                };

                drop(stream);
                unsubscribe().await;
                if let Err(e) = pubsub.shutdown().await {
                    debug!("Pubsub shutdown: {}", e);
                }
                Ok::<_, PubsubClientError>(outcome)
            })
            .await
    }

    async fn poll_signature_status(&self, signature: &Signature) -> Result<Option<SignatureOutcome>, RpcError> {
        let signature = *signature;
        let response = self
            .rpc
            .execute_with_retry("get_signature_statuses", move |client: Arc<RpcClient>| async move {
                client.get_signature_statuses(&[signature]).await
            })
            .await?;

        let status = response.value.into_iter().next().flatten();
        Ok(status.and_then(|status| status_outcome(&status, self.commitment)))
    }
}

#[async_trait]
impl WalletProbe for SolanaGateway {
    async fn settlement_balance(&self) -> Result<Decimal, RpcError> {
        if self.settlement.mint == WRAPPED_SOL_MINT {
            let lamports = self.lamports().await?;
            return Ok(Decimal::from_i128_with_scale(i128::from(lamports), LAMPORTS_PER_SOL_DECIMALS));
        }

        let account = self.settlement_account();
        let balance = self
            .rpc
            .execute_with_retry("get_token_account_balance", move |client: Arc<RpcClient>| async move {
                client.get_token_account_balance(&account).await
            })
            .await?;
        raw_amount_to_decimal(&balance.amount, balance.decimals).ok_or_else(|| {
            RpcError::Ledger(format!("unparseable token balance {} for {}", balance.amount, account))
        })
    }

    async fn gas_balance_lamports(&self) -> Result<u64, RpcError> {
        self.lamports().await
    }

    fn last_round_trip(&self) -> Duration {
        self.rpc.last_round_trip()
    }
}
