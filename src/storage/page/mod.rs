pub mod free_list_page;
mod header_page;
mod meta_page;
mod page_io;

pub use header_page::{FileHeader, RootSlot};
pub use meta_page::{IndexDescriptor, MetaPage};
pub use page_io::{PageReader, PageType, PageWriter};
