//! RPC resilience layer - weighted endpoints, retry policy and health probing

pub mod endpoint;
pub mod error_class;
pub mod health_prober;
pub mod rpc_manager;

pub use endpoint::{EndpointState, EndpointStats, EndpointStatus, RpcEndpoint};
pub use error_class::{ClassifyError, ErrorClass};
pub use health_prober::spawn_health_prober;
pub use rpc_manager::{RetryPolicy, RpcManager};
