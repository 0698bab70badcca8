pub mod error;
pub mod network;
pub mod peer;
pub mod relay;

pub use error::HarnessError;
pub use network::{Delivery, TestNetwork};
pub use peer::TestPeer;
pub use relay::{ConnectionId, Relay, RelayConfig};
