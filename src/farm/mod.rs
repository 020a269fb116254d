//! Farm domain: entities, cache keys and the backend client.

mod keys;
mod remote;
mod types;

pub use keys::FarmQueryKey;
pub use remote::RestRemote;
pub use types::{ClanPost, EntityKind, LatLng, PestReport, Plot, ProgressEvent, Record};
