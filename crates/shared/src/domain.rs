use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ImageId, u64);
// 1-based position in the remote catalog.
id_newtype!(CatalogIndex, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A raw RGBA frame grabbed from a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0; (width as usize) * (height as usize) * 4])
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    live: AtomicUsize,
}

/// Issues [`ImageHandle`]s and tracks how many are still unreleased.
#[derive(Debug, Clone, Default)]
pub struct ImageRegistry {
    inner: Arc<RegistryInner>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: impl Into<Arc<[u8]>>) -> ImageHandle {
        let id = ImageId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        ImageHandle {
            id,
            bytes: bytes.into(),
            registry: Arc::clone(&self.inner),
            released: false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }
}

/// Owned reference to in-memory image data.
///
/// Not `Clone`: the owner releases it exactly once, either explicitly through
/// [`ImageHandle::release`] or implicitly on drop.
#[derive(Debug)]
pub struct ImageHandle {
    id: ImageId,
    bytes: Arc<[u8]>,
    registry: Arc<RegistryInner>,
    released: bool,
}

impl ImageHandle {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn view(&self) -> ImageView {
        ImageView {
            id: self.id,
            bytes: Arc::clone(&self.bytes),
        }
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Read-only view of an image for presentation snapshots.
///
/// Views compare by identity, not content.
#[derive(Debug, Clone)]
pub struct ImageView {
    pub id: ImageId,
    pub bytes: Arc<[u8]>,
}

impl PartialEq for ImageView {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for ImageView {}
