//! The `graphql-ws` subscription protocol over a WebSocket.
//!
//! One physical connection carries one control channel (init/ack/terminate)
//! and any number of multiplexed subscription streams, each identified by a
//! client-chosen operation id with its own start/stop lifecycle.
//!
//! Manual testing can be performed using `wscat`:
//! ```ignore
//! $ wscat -s graphql-ws -c ws://localhost:8000/graphql
//! > {"type": "connection_init"}
//! < {"type":"connection_ack"}
//! > {"type": "start", "id": "demo", "payload": {"query": "subscription { example }"}}
//! < {"type":"data","id":"demo","payload":{"data":{"example":"Hi"}}}
//! < {"type":"complete","id":"demo"}
//! ```

mod data;
mod logic;

pub use data::*;
pub use logic::*;
