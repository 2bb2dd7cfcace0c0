//! objdb - the index engine of an embedded object database
//!
//! Objects are located through a paged B+Tree that maps object ids to file
//! positions. Further B+Trees index field values, optionally enforcing
//! uniqueness. All trees live in one page file and are committed together
//! with copy-on-write and a two-slot root swap: a commit writes changed
//! pages to fresh page ids and then flips a single header field, so a crash
//! at any point leaves the previous commit readable.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): the page file and the fixed page formats
//!   - `DiskManager`: reads and writes pages of a runtime-chosen size
//!   - `DiskScheduler`: background writer used by commit
//!   - `FreeSpaceManager`: page allocation with deferred reuse
//!   - `FileHeader`, `MetaPage`: the root slots and the snapshot they name
//!
//! - **Index** (`index`): the B+Tree core and its specializations
//!   - `PagedIndex`: insert/find/remove/iterate over 64-bit keys
//!   - `OidIndex`: object id to file position, plus id allocation
//!   - `AttributeIndex`: unique and non-unique field value indexes
//!
//! - **Transactions** (`txn`): `Database`, `Transaction`, `Snapshot`
//!
//! # Example
//!
//! ```rust,no_run
//! use objdb::common::{DatabaseConfig, EntryWidth, PageId, Position};
//! use objdb::txn::Database;
//!
//! let mut db = Database::create("objects.db", DatabaseConfig::default()).unwrap();
//!
//! let mut tx = db.begin();
//! let oids = tx.allocate_oids(1).unwrap();
//! let email = tx.create_index("person.email", true, EntryWidth::Long).unwrap();
//! tx.add_oid(oids.start, Position::new(PageId::new(7), 120)).unwrap();
//! tx.index_insert(email, "ann@example.org", oids.start).unwrap();
//! tx.commit().unwrap();
//!
//! let mut snapshot = db.snapshot().unwrap();
//! assert_eq!(snapshot.lookup("person.email", "ann@example.org").unwrap(), vec![oids.start]);
//! ```

pub mod common;
pub mod index;
pub mod storage;
pub mod txn;

// Re-export commonly used types at the crate root
pub use common::{ObjDbError, Oid, PageId, Position, Result};
pub use txn::{Database, Snapshot, Transaction};
