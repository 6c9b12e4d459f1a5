//! JSON-RPC plumbing: wire codec, pending-call table, outbound writer

pub mod codec;
mod outbound;
mod pending;

pub use codec::{Message, RpcError, decode, encode};
pub use outbound::Outbound;
pub use pending::{CallReply, PendingCalls};
