pub mod arg;
pub mod exec;
pub mod meta;
pub mod rpc;

pub use arg::PluginArg;
pub use exec::{launch, LaunchedPlugin, DEFAULT_HANDSHAKE_TIMEOUT};
pub use meta::{PluginMeta, Response};
pub use rpc::{
    PluginRpcClient, RpcFault, RpcReply, RpcRequest, DEFAULT_CALL_TIMEOUT, DEFAULT_DIAL_TIMEOUT,
};
