//! Maps client errors onto the retry policy's error classes

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::pubsub_client::PubsubClientError;
use solana_client::rpc_request::RpcError as ClientRpcError;

/// JSON-RPC code for a transaction that failed preflight simulation
const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider throttling; exponential backoff
    RateLimited,
    /// No answer in time; linear backoff
    Timeout,
    /// The ledger rejected the request itself; never retried
    Ledger,
    /// Anything else; counts against the endpoint's health
    Transport,
}

pub trait ClassifyError {
    fn classify(&self) -> ErrorClass;
}

impl ClassifyError for ClientError {
    fn classify(&self) -> ErrorClass {
        match self.kind() {
            ClientErrorKind::TransactionError(_) | ClientErrorKind::SigningError(_) => ErrorClass::Ledger,
            ClientErrorKind::RpcError(ClientRpcError::RpcResponseError { code, .. })
                if *code == SEND_TRANSACTION_PREFLIGHT_FAILURE =>
            {
                ErrorClass::Ledger
            }
            ClientErrorKind::Reqwest(e) if e.is_timeout() => ErrorClass::Timeout,
            ClientErrorKind::Reqwest(e) if e.status().map(|s| s.as_u16()) == Some(429) => ErrorClass::RateLimited,
            _ => classify_message(&self.to_string()),
        }
    }
}

impl ClassifyError for PubsubClientError {
    fn classify(&self) -> ErrorClass {
        classify_message(&self.to_string())
    }
}

/// Fallback classification by message pattern
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
        ErrorClass::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorClass::Timeout
    } else {
        ErrorClass::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message_patterns() {
        assert_eq!(classify_message("HTTP status client error (429 Too Many Requests)"), ErrorClass::RateLimited);
        assert_eq!(classify_message("Rate limit exceeded"), ErrorClass::RateLimited);
        assert_eq!(classify_message("operation timed out"), ErrorClass::Timeout);
        assert_eq!(classify_message("connection refused"), ErrorClass::Transport);
    }

    #[test]
    fn test_client_error_kinds() {
        let custom = ClientError::from(ClientErrorKind::Custom("too many requests".to_string()));
        assert_eq!(custom.classify(), ErrorClass::RateLimited);

        let ledger = ClientError::from(ClientErrorKind::TransactionError(
            solana_sdk::transaction::TransactionError::BlockhashNotFound,
        ));
        assert_eq!(ledger.classify(), ErrorClass::Ledger);

        let preflight = ClientError::from(ClientErrorKind::RpcError(ClientRpcError::RpcResponseError {
            code: SEND_TRANSACTION_PREFLIGHT_FAILURE,
            message: "Transaction simulation failed".to_string(),
            data: solana_client::rpc_request::RpcResponseErrorData::Empty,
        }));
        assert_eq!(preflight.classify(), ErrorClass::Ledger);
    }
}
