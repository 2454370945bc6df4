//! Pipelined batch insertion into the feature store
//!
//! The producer (the sequence reader thread) collects window sketches into
//! batches and hands full batches to a bounded queue; a single background
//! worker drains the queue and applies the inserts. The worker owns the
//! feature store for the lifetime of the inserter and hands it back when
//! the inserter is finished. A worker failure latches `valid` to false:
//! producers observing it stop enqueueing and surface the error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::constants::{INSERTER_BATCH_SIZE, INSERTER_QUEUE_SIZE};
use crate::error::DatabaseError;
use crate::hash_multimap::HashMultimap;
use crate::sketcher::Sketch;
use crate::types::{Location, TargetId, WindowId};

/// Batch queue tuning
#[derive(Clone, Copy, Debug)]
pub struct BatchProcessingOptions {
    /// Window sketches per batch
    pub batch_size: usize,
    /// Batches the queue holds before producers block
    pub queue_size: usize,
}

impl Default for BatchProcessingOptions {
    fn default() -> Self {
        Self {
            batch_size: INSERTER_BATCH_SIZE,
            queue_size: INSERTER_QUEUE_SIZE,
        }
    }
}

/// One sketched window of one target, queued for insertion
#[derive(Debug)]
pub(crate) struct WindowSketch {
    pub tgt: TargetId,
    pub win: WindowId,
    pub sk: Sketch,
}

type SketchBatch = Vec<WindowSketch>;

/// Background inserter that owns the feature store while targets are added
pub(crate) struct SketchInserter {
    tx: Option<Sender<SketchBatch>>,
    worker: Option<JoinHandle<HashMultimap>>,
    valid: Arc<AtomicBool>,
    batch: SketchBatch,
    batch_size: usize,
}

impl SketchInserter {
    /// Move `store` into a worker thread and start draining batches.
    ///
    /// Buckets exceeding `max_locs_per_feature` are shrunk immediately
    /// after each insert.
    pub fn spawn(
        mut store: HashMultimap,
        max_locs_per_feature: usize,
        options: BatchProcessingOptions,
    ) -> Self {
        let (tx, rx) = bounded::<SketchBatch>(options.queue_size);
        let valid = Arc::new(AtomicBool::new(true));

        // if this thread panics the receiver is dropped, the next flush
        // fails to send, and `valid` latches to false
        let worker = std::thread::spawn(move || {
            for batch in rx {
                for ws in &batch {
                    for &feature in &ws.sk {
                        let bucket = store.insert(feature, Location::new(ws.tgt, ws.win));
                        if store.bucket_size(bucket) > max_locs_per_feature {
                            store.shrink(bucket, max_locs_per_feature);
                        }
                    }
                }
            }
            store
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
            valid,
            batch: Vec::with_capacity(options.batch_size),
            batch_size: options.batch_size,
        }
    }

    /// True while the worker is healthy
    pub fn valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Queue one window sketch; blocks when the batch queue is full
    pub fn submit(&mut self, ws: WindowSketch) -> Result<(), DatabaseError> {
        if !self.valid() {
            return Err(DatabaseError::InserterFailed);
        }
        self.batch.push(ws);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DatabaseError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let tx = self.tx.as_ref().ok_or(DatabaseError::InserterFailed)?;
        if tx.send(batch).is_err() {
            // receiver gone: the worker died
            self.valid.store(false, Ordering::Release);
            return Err(DatabaseError::InserterFailed);
        }
        Ok(())
    }

    /// Drain the queue, join the worker and hand the feature store back
    pub fn finish(mut self) -> Result<HashMultimap, DatabaseError> {
        self.flush()?;
        drop(self.tx.take());
        let worker = self.worker.take().expect("worker joined twice");
        match worker.join() {
            Ok(store) => Ok(store),
            Err(_) => {
                self.valid.store(false, Ordering::Release);
                Err(DatabaseError::InserterFailed)
            }
        }
    }
}

impl Drop for SketchInserter {
    fn drop(&mut self) {
        // synchronous teardown: flush what we can and join the worker
        let _ = self.flush();
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_of(features: &[u32]) -> Sketch {
        features.to_vec()
    }

    #[test]
    fn test_insert_through_pipeline() {
        let mut inserter = SketchInserter::spawn(
            HashMultimap::new(),
            254,
            BatchProcessingOptions {
                batch_size: 2,
                queue_size: 4,
            },
        );
        for win in 0..5u32 {
            inserter
                .submit(WindowSketch {
                    tgt: 0,
                    win,
                    sk: sketch_of(&[11, 22]),
                })
                .unwrap();
        }
        let store = inserter.finish().unwrap();
        let b = store.find(11).unwrap();
        let wins: Vec<u32> = store.bucket_values(b).iter().map(|l| l.win).collect();
        assert_eq!(wins, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.key_count(), 2);
    }

    #[test]
    fn test_location_cap_applied_during_insert() {
        let mut inserter = SketchInserter::spawn(
            HashMultimap::new(),
            3,
            BatchProcessingOptions::default(),
        );
        for win in 0..10u32 {
            inserter
                .submit(WindowSketch {
                    tgt: 0,
                    win,
                    sk: sketch_of(&[42]),
                })
                .unwrap();
        }
        let store = inserter.finish().unwrap();
        let b = store.find(42).unwrap();
        assert_eq!(store.bucket_size(b), 3);
        // the earliest locations survive
        assert_eq!(
            store.bucket_values(b),
            &[
                Location::new(0, 0),
                Location::new(0, 1),
                Location::new(0, 2)
            ]
        );
    }

    #[test]
    fn test_empty_inserter_finishes() {
        let inserter =
            SketchInserter::spawn(HashMultimap::new(), 254, BatchProcessingOptions::default());
        let store = inserter.finish().unwrap();
        assert_eq!(store.key_count(), 0);
    }
}
