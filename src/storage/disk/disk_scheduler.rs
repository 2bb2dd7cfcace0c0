use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::common::{ObjDbError, PageId, Result};

use super::DiskManager;

/// Queue depth of the background writer
const REQUEST_QUEUE_DEPTH: usize = 128;

/// A request processed by the background writer, strictly in queue order.
pub enum DiskRequest {
    /// Write an owned page image
    Write { page_id: PageId, data: Vec<u8> },
    /// Report the first failure since the previous barrier once all
    /// earlier writes have been performed
    Barrier {
        done: std::sync::mpsc::Sender<Result<()>>,
    },
}

/// DiskScheduler owns a background thread that performs page writes queued
/// by the commit path, so that page serialization and file I/O overlap.
/// Callers must call `flush()` before relying on queued writes.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    pages_written: Arc<AtomicU64>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(REQUEST_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));
        let pages_written = Arc::new(AtomicU64::new(0));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);
        let written_clone = Arc::clone(&pages_written);

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(dm_clone, receiver, shutdown_clone, written_clone);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            pages_written,
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a page image for writing. Blocks only when the queue is full.
    pub fn schedule_write(&self, page_id: PageId, data: Vec<u8>) -> Result<()> {
        if data.len() != self.disk_manager.page_size() {
            return Err(ObjDbError::PageOverflow {
                needed: data.len(),
                available: self.disk_manager.page_size(),
            });
        }
        self.request_sender
            .send(DiskRequest::Write { page_id, data })
            .map_err(|e| ObjDbError::DiskScheduler(format!("Failed to schedule write: {}", e)))
    }

    /// Waits until every previously queued write has been performed and
    /// returns the first write failure among them.
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.request_sender
            .send(DiskRequest::Barrier { done: tx })
            .map_err(|e| ObjDbError::DiskScheduler(format!("Failed to schedule barrier: {}", e)))?;

        rx.recv().map_err(|e| {
            ObjDbError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// Total number of pages written by the worker.
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn start_worker_thread(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
        pages_written: Arc<AtomicU64>,
    ) {
        let mut failure: Option<ObjDbError> = None;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request, &mut failure, &pages_written);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => {
                    Self::process_request(&disk_manager, request, &mut failure, &pages_written);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(
        disk_manager: &DiskManager,
        request: DiskRequest,
        failure: &mut Option<ObjDbError>,
        pages_written: &AtomicU64,
    ) {
        match request {
            DiskRequest::Write { page_id, data } => {
                // Later writes are skipped once one failed; the commit is lost anyway.
                if failure.is_some() {
                    return;
                }
                match disk_manager.write_page(page_id, &data) {
                    Ok(()) => {
                        pages_written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!(%page_id, error = %e, "background page write failed");
                        *failure = Some(e);
                    }
                }
            }
            DiskRequest::Barrier { done } => {
                let outcome = match failure.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
                let _ = done.send(outcome);
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const PAGE: usize = 256;

    #[test]
    fn test_disk_scheduler_write_then_flush() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path(), PAGE).unwrap());
        let scheduler = DiskScheduler::new(dm.clone());

        let mut data = vec![0u8; PAGE];
        data[0] = 42;
        data[100] = 255;
        scheduler.schedule_write(PageId::new(2), data).unwrap();
        scheduler.flush().unwrap();

        let mut read_data = vec![0u8; PAGE];
        dm.read_page(PageId::new(2), &mut read_data).unwrap();
        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(scheduler.pages_written(), 1);
    }

    #[test]
    fn test_disk_scheduler_preserves_order() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path(), PAGE).unwrap());
        let scheduler = DiskScheduler::new(dm.clone());

        for i in 0..10u8 {
            scheduler
                .schedule_write(PageId::new(1), vec![i; PAGE])
                .unwrap();
        }
        scheduler.flush().unwrap();

        let mut read_data = vec![0u8; PAGE];
        dm.read_page(PageId::new(1), &mut read_data).unwrap();
        assert_eq!(read_data[0], 9);
    }

    #[test]
    fn test_disk_scheduler_rejects_wrong_size() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path(), PAGE).unwrap());
        let scheduler = DiskScheduler::new(dm);

        assert!(scheduler.schedule_write(PageId::new(1), vec![0; 10]).is_err());
    }
}
