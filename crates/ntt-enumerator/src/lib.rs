//! Filesystem enumerator (§4.3).
//!
//! Walks a mounted subtree once and writes the `.raw` binary record stream
//! consumed by `ntt-loader`. The output is a lazy finite byte stream;
//! restarting means re-enumerating from scratch, there is no checkpoint.

mod error;
mod record;
mod walk;

pub use error::{EnumeratorError, Result};
pub use record::{FsType, Record, FIELD_SEP, RECORD_TERM, UNREADABLE_SIZE_SENTINEL};
pub use walk::{enumerate_into, EnumerationStats};
