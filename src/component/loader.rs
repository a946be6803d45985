//! Deferred asset hand-off for components whose creation waits on a load.
//!
//! A loader thread receives an `AssetRequest` and completes it exactly once.
//! The voice builder holds the matching `PendingAsset` and polls it from the
//! control thread; nothing here blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::dsp::sample::SampleBuffer;

pub type Asset = Arc<SampleBuffer>;

type Delivery = Result<Asset, String>;

/// Producer half, owned by whoever performs the load.
pub struct AssetRequest {
    name: String,
    tx: Producer<Delivery>,
}

impl AssetRequest {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn complete(mut self, asset: Asset) {
        // Capacity is one and this is the only push.
        let _ = self.tx.push(Ok(asset));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        let _ = self.tx.push(Err(reason.into()));
    }
}

#[derive(Debug)]
pub enum AssetPoll {
    Pending,
    Ready(Asset),
    Failed(String),
}

/// Consumer half, polled by the voice builder.
pub struct PendingAsset {
    name: String,
    rx: Consumer<Delivery>,
}

impl PendingAsset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll(&mut self) -> AssetPoll {
        match self.rx.pop() {
            Ok(Ok(asset)) => AssetPoll::Ready(asset),
            Ok(Err(reason)) => AssetPoll::Failed(reason),
            Err(_) if self.rx.is_abandoned() => {
                AssetPoll::Failed(format!("loader for `{}` went away", self.name))
            }
            Err(_) => AssetPoll::Pending,
        }
    }
}

pub fn asset_channel(name: &str) -> (AssetRequest, PendingAsset) {
    let (tx, rx) = RingBuffer::new(1);
    (
        AssetRequest {
            name: name.to_string(),
            tx,
        },
        PendingAsset {
            name: name.to_string(),
            rx,
        },
    )
}

/// Source of sample data for sample-backed components.
pub trait SampleLibrary: Send + Sync {
    fn load(&self, instrument: &str) -> PendingAsset;
}

/// Library over samples already in memory. Loads complete immediately.
#[derive(Default)]
pub struct MemorySampleLibrary {
    samples: HashMap<String, Asset>,
}

impl MemorySampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, instrument: &str, sample: SampleBuffer) -> Self {
        self.samples.insert(instrument.to_string(), Arc::new(sample));
        self
    }
}

impl SampleLibrary for MemorySampleLibrary {
    fn load(&self, instrument: &str) -> PendingAsset {
        let (request, pending) = asset_channel(instrument);
        match self.samples.get(instrument) {
            Some(sample) => request.complete(Arc::clone(sample)),
            None => request.fail(format!("unknown instrument `{instrument}`")),
        }
        pending
    }
}

/// Library whose loads stay pending until the owner settles them, standing
/// in for a loader thread.
#[derive(Default)]
pub struct DeferredSampleLibrary {
    samples: HashMap<String, Asset>,
    requests: Mutex<VecDeque<AssetRequest>>,
}

impl DeferredSampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, instrument: &str, sample: SampleBuffer) -> Self {
        self.samples.insert(instrument.to_string(), Arc::new(sample));
        self
    }

    pub fn pending_loads(&self) -> usize {
        self.requests.lock().map_or(0, |requests| requests.len())
    }

    /// Settle every outstanding load; unknown instruments fail. Returns how
    /// many loads were settled.
    pub fn complete_all(&self) -> usize {
        let drained: Vec<AssetRequest> = match self.requests.lock() {
            Ok(mut requests) => requests.drain(..).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for request in drained {
            match self.samples.get(request.name()) {
                Some(sample) => request.complete(Arc::clone(sample)),
                None => {
                    let reason = format!("unknown instrument `{}`", request.name());
                    request.fail(reason);
                }
            }
        }
        count
    }

    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<AssetRequest> = match self.requests.lock() {
            Ok(mut requests) => requests.drain(..).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for request in drained {
            request.fail(reason);
        }
        count
    }
}

impl SampleLibrary for DeferredSampleLibrary {
    fn load(&self, instrument: &str) -> PendingAsset {
        let (request, pending) = asset_channel(instrument);
        match self.requests.lock() {
            Ok(mut requests) => requests.push_back(request),
            Err(_) => request.fail("sample library lock poisoned"),
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_until_completed() {
        let (request, mut pending) = asset_channel("piano");
        assert!(matches!(pending.poll(), AssetPoll::Pending));

        request.complete(Arc::new(SampleBuffer::new(vec![0.0; 4], 48_000.0)));
        assert!(matches!(pending.poll(), AssetPoll::Ready(_)));
    }

    #[test]
    fn dropped_request_fails() {
        let (request, mut pending) = asset_channel("piano");
        drop(request);
        assert!(matches!(pending.poll(), AssetPoll::Failed(_)));
    }

    #[test]
    fn memory_library_reports_unknown_instruments() {
        let library = MemorySampleLibrary::new().with("piano", SampleBuffer::new(vec![0.0; 4], 48_000.0));

        assert!(matches!(library.load("piano").poll(), AssetPoll::Ready(_)));
        assert!(matches!(library.load("harp").poll(), AssetPoll::Failed(_)));
    }

    #[test]
    fn deferred_library_waits_for_its_owner() {
        let library = DeferredSampleLibrary::new().with("piano", SampleBuffer::new(vec![0.0; 4], 48_000.0));
        let mut piano = library.load("piano");
        let mut harp = library.load("harp");

        assert!(matches!(piano.poll(), AssetPoll::Pending));
        assert_eq!(library.pending_loads(), 2);
        assert_eq!(library.complete_all(), 2);

        assert!(matches!(piano.poll(), AssetPoll::Ready(_)));
        assert!(matches!(harp.poll(), AssetPoll::Failed(_)));
    }
}
