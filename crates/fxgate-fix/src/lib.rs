//! FIX 4.4 session layer.
//!
//! One logical session per liquidity provider over TCP (optionally through
//! a SOCKS5 proxy). Provides:
//! - tag=value codec with BodyLength/CheckSum framing
//! - typed application messages for the subset of FIX 4.4 this core speaks
//! - sequence-number discipline with durable persistence and gap recovery
//! - heartbeat / TestRequest liveness
//! - market-data subscription flow (SecurityDefinitionRequest first)

pub mod codec;
pub mod error;
pub mod heartbeat;
pub mod messages;
pub mod seqnum;
pub mod session;
pub mod subscription;
pub mod transport;

pub use codec::{FixDecoder, RawMessage};
pub use error::{FixError, FixResult};
pub use heartbeat::HeartbeatManager;
pub use messages::{
    ExecType, ExecutionReport, FixMessage, MdEntryType, MsgType, NewOrderSingle,
    OrderCancelRequest, OrderStatusRequest,
};
pub use seqnum::SeqNumStore;
pub use session::{
    FixSession, SessionCommand, SessionConfig, SessionEvent, SessionHandle, SessionState,
};
pub use subscription::SubscriptionManager;
pub use transport::{BoxFuture, Dialer, SessionStream, TcpDialer};
