pub mod acquirer;
pub mod archive;
pub mod content_filter;
pub mod remote;
pub mod tree_hasher;

pub use acquirer::{Acquisition, ResourceAcquirer};
pub use content_filter::ContentFilter;
pub use remote::{Credentials, RemoteClient, BAD_REQUEST_SENTINEL_HASH};
pub use tree_hasher::{TreeHasher, TreeStats};
