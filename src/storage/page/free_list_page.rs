//! Free-list pages persist the free space manager.
//!
//! ```text
//! [page header][next: i32][count: i32][pageId: i32 * count]
//! ```
//!
//! The chain is rewritten to freshly allocated pages at every commit.

use crate::common::{ObjDbError, PageId, Result, TxId, NO_PAGE, PAGE_HEADER_SIZE};
use crate::storage::disk::DiskManager;

use super::page_io::{PageReader, PageType, PageWriter};

const CHAIN_HEADER_SIZE: usize = 8;

/// Number of page ids one free-list page can hold.
pub fn ids_per_page(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE - CHAIN_HEADER_SIZE) / 4
}

/// Number of chain pages needed to store `count` ids.
pub fn pages_needed(count: usize, page_size: usize) -> usize {
    count.div_ceil(ids_per_page(page_size))
}

/// Serializes `ids` into the given chain pages, in order.
pub fn encode_chain(
    ids: &[PageId],
    chain: &[PageId],
    page_size: usize,
    tx_id: TxId,
) -> Result<Vec<(PageId, Vec<u8>)>> {
    let per_page = ids_per_page(page_size);
    if pages_needed(ids.len(), page_size) > chain.len() {
        return Err(ObjDbError::PageOverflow {
            needed: ids.len(),
            available: chain.len() * per_page,
        });
    }

    let mut pages = Vec::with_capacity(chain.len());
    for (i, &page_id) in chain.iter().enumerate() {
        let start = (i * per_page).min(ids.len());
        let end = ((i + 1) * per_page).min(ids.len());
        let next = chain.get(i + 1).copied().unwrap_or(NO_PAGE);

        let mut writer = PageWriter::new(page_size, PageType::FreeList, tx_id);
        writer.write_page_id(next)?;
        writer.write_i32((end - start) as i32)?;
        for id in &ids[start..end] {
            writer.write_page_id(*id)?;
        }
        pages.push((page_id, writer.finish()));
    }

    Ok(pages)
}

/// Reads a chain starting at `head`. Returns the free ids and the ids of
/// the chain pages themselves.
pub fn read_chain(disk: &DiskManager, head: PageId) -> Result<(Vec<PageId>, Vec<PageId>)> {
    let mut ids = Vec::new();
    let mut chain = Vec::new();
    let mut current = head;

    while current != NO_PAGE {
        if chain.contains(&current) {
            return Err(ObjDbError::corrupted(format!(
                "free-list chain loops at {}",
                current
            )));
        }
        chain.push(current);

        let mut data = vec![0u8; disk.page_size()];
        disk.read_page(current, &mut data)?;
        let mut reader = PageReader::new(current, data)?;
        reader.expect_type(PageType::FreeList)?;

        let next = reader.read_page_id()?;
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(ObjDbError::corrupted(format!(
                "free-list page {} has negative count",
                current
            )));
        }
        for _ in 0..count {
            ids.push(reader.read_page_id()?);
        }
        current = next;
    }

    Ok((ids, chain))
}
