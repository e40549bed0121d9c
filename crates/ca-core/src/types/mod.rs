mod options;
mod rpc;

pub use options::*;
pub use rpc::*;
