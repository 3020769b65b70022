// Blockweave common library - main library exports

pub mod block;
pub mod hash;
pub mod rest_error;
pub mod rest_response;
pub mod shutdown;
pub mod transaction;

// Flattened re-exports
pub use self::block::{Block, BlockCandidate};
pub use self::hash::ContentHash;
pub use self::rest_error::RestError;
pub use self::rest_response::RestResponse;
pub use self::shutdown::ShutdownSignal;
pub use self::transaction::Transaction;
