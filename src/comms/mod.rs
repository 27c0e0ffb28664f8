//! Inter-thread messaging and the operator-facing remote service.

pub mod message;
pub mod remote;
pub mod router;
