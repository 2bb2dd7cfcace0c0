mod attribute_index;
mod index_iterator;
pub mod key_encoding;
pub mod node;
mod oid_index;
mod paged_index;

pub use attribute_index::{AttributeIndex, AttributeIterator};
pub use index_iterator::IndexIterator;
pub use key_encoding::SortableKey;
pub use node::{IndexLayout, PageState};
pub use oid_index::{OidIndex, OidIterator};
pub use paged_index::{IndexStatistics, InsertOutcome, PagedIndex};
