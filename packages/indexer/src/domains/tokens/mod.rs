// Credential resolution and the rate-limit gate.

pub mod broker;
pub mod rate_limit;
pub mod scopes;

pub use broker::{ResolvedToken, TokenBroker, TokenSource};
pub use rate_limit::{check_rate_limit, RateGateDecision};
pub use scopes::{scopes_for_operation, TokenOperation};
