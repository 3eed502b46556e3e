//! RPC plumbing: the multiplexed channel, the pipeline proxy and its
//! event pump

pub mod channel;
pub mod proxy;

pub use channel::ClientChannel;
pub use proxy::PipelineRpcProxy;
