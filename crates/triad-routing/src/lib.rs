//! Provider-facing routing primitives: the concurrency gate (§4.B), circuit
//! breaker (§4.C), and hedged router (§4.D) that sit between the stage
//! runner and the provider adapter set.

pub mod breaker;
pub mod gate;
pub mod hedge;
pub mod role;

pub use breaker::CircuitBreaker;
pub use gate::{ConcurrencyGate, GatePermit};
pub use hedge::{CallFuture, CompositeError, HedgedRouter, RouterOutcome};
pub use role::{default_policy, Role, RolePolicy, RouterMode};
