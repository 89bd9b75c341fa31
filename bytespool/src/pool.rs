//! Size-classed pool of reusable byte buffers.
//!
//! # Size Classes
//!
//! Buffers are organized into power-of-two size classes starting at
//! `min_size`. With the default configuration (`min_size = 1024`,
//! `num_classes = 18`):
//! - Class 0: 1 KiB
//! - Class 1: 2 KiB
//! - ...
//! - Class 17: 128 MiB
//!
//! Allocation requests are rounded up to the next size class. Requests larger
//! than the largest class return [Error::Oversized] from [SizedPool::try_alloc],
//! or fall back to an unmanaged heap allocation from [SizedPool::alloc].
//!
//! # Ownership
//!
//! An allocation is an [Origin]: the full-capacity buffer plus the length that
//! was requested. The requested window is only reachable by borrowing the
//! origin ([Origin::view], [Origin::view_mut]), and [SizedPool::free] takes the
//! origin by value, so a buffer cannot be touched after it has been handed back.
//!
//! Dropping an [Origin] without freeing it is allowed; its memory is released
//! normally and the pool never sees it again.
//!
//! # Thread Safety
//!
//! [SizedPool] is `Send + Sync` and cheap to clone. Classes are independent:
//! each is backed by its own [Recycler] and there is no lock shared between
//! them.

use crate::{
    class::{self, BASE_SIZE, NUM_CLASSES},
    recycler::{Factory, Freelist, Recycler},
    Error, NZUsize, ScopedBuffer,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{
    io::{self, Read},
    num::NonZeroUsize,
    sync::Arc,
};
use tracing::{debug, trace};

/// Configuration for a [SizedPool].
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the smallest class. Must be a power of two.
    pub min_size: NonZeroUsize,
    /// Number of classes. Class `i` holds buffers of `min_size << i` bytes.
    pub num_classes: NonZeroUsize,
    /// Maximum number of idle buffers retained per class.
    pub max_per_class: NonZeroUsize,
    /// Whether to fill every class up to `max_per_class` on pool creation.
    pub prefill: bool,
}

impl Default for Config {
    /// 1 KiB to 128 MiB in 18 classes, 64 idle buffers per class, not prefilled.
    fn default() -> Self {
        Self {
            min_size: NZUsize!(BASE_SIZE),
            num_classes: NZUsize!(NUM_CLASSES),
            max_per_class: NZUsize!(64),
            prefill: false,
        }
    }
}

impl Config {
    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `min_size` is not a power of two
    /// - the largest class does not fit in a `usize`
    fn validate(&self) {
        assert!(
            self.min_size.is_power_of_two(),
            "min_size must be a power of two"
        );
        assert!(
            (self.min_size.leading_zeros() as usize) >= self.num_classes.get() - 1,
            "max_size overflows usize (min_size {}, num_classes {})",
            self.min_size,
            self.num_classes
        );
    }

    /// Returns the size of the largest class.
    ///
    /// # Panics
    ///
    /// Panics if the largest class does not fit in a `usize`.
    pub const fn max_size(&self) -> usize {
        self.class_size(self.num_classes.get() - 1)
    }

    /// Returns the buffer size for a given class index.
    ///
    /// # Panics
    ///
    /// Panics if the class size does not fit in a `usize`.
    pub const fn class_size(&self, index: usize) -> usize {
        class::class_size(self.min_size.get(), index)
    }

    /// Returns the class that serves a request of `size` bytes.
    /// Returns None if size > max_size.
    ///
    /// # Panics
    ///
    /// Panics if the largest class does not fit in a `usize`.
    pub const fn class_index(&self, size: usize) -> Option<usize> {
        if size > self.max_size() {
            return None;
        }
        Some(class::bucket_index(self.min_size.get(), size))
    }

    /// Returns the class a buffer of exactly `len` bytes can be returned to.
    const fn pooled_index(&self, len: usize) -> Option<usize> {
        class::class_of_len(self.min_size.get(), self.num_classes.get(), len)
    }
}

/// Outcome of [SizedPool::free].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freed {
    /// The buffer was handed to the recycler of this class.
    ///
    /// The recycler may still drop it (retention is best-effort).
    Pooled(usize),
    /// The buffer length does not match any class; it was dropped.
    NotPooled,
}

impl Freed {
    /// Returns the class index the buffer was returned to, if any.
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Pooled(index) => Some(index),
            Self::NotPooled => None,
        }
    }

    /// Returns `true` if the buffer was returned to a class.
    pub const fn is_pooled(self) -> bool {
        matches!(self, Self::Pooled(_))
    }
}

/// A buffer obtained from [SizedPool::alloc].
///
/// Owns the full-capacity storage. The first [Origin::len] bytes are the view
/// that was requested; the rest is spare capacity of the size class.
///
/// # Initialization
///
/// The contents are **not** zeroed: a recycled buffer still holds whatever the
/// previous user wrote. Overwrite the view before trusting it.
pub struct Origin {
    buf: Vec<u8>,
    len: usize,
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Origin {
    fn new(buf: Vec<u8>, len: usize) -> Self {
        debug_assert!(len <= buf.len());
        Self { buf, len }
    }

    /// Returns the length of the view.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the full length of the underlying storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the requested window.
    #[inline]
    pub fn view(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns the requested window, mutably.
    #[inline]
    pub fn view_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Shortens the view to `len` bytes.
    ///
    /// If `len` is greater than the current view, this has no effect. Capacity
    /// is unchanged.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Takes the view out of the pool's bookkeeping.
    ///
    /// The returned vector holds exactly the view.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }

    /// Returns the whole storage, including spare capacity.
    #[inline]
    pub(crate) fn storage(&self) -> &[u8] {
        &self.buf
    }

    fn into_storage(self) -> Vec<u8> {
        self.buf
    }
}

impl AsRef<[u8]> for Origin {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.view()
    }
}

impl AsMut<[u8]> for Origin {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.view_mut()
    }
}

/// Adopts a buffer allocated elsewhere.
///
/// The view covers the whole vector. [SizedPool::free] accepts it only if its
/// length happens to be a valid class size.
impl From<Vec<u8>> for Origin {
    fn from(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len }
    }
}

/// Label for pool metrics, identifying the size class.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SizeClassLabel {
    size_class: u64,
}

/// Metrics for the pool.
///
/// Families are created up front so that [SizedPool::register] can be called
/// at any point after construction.
#[derive(Default)]
struct Metrics {
    /// Total number of allocations served by a class.
    allocations: Family<SizeClassLabel, Counter>,
    /// Total number of buffers built because a class had none to reuse.
    created: Family<SizeClassLabel, Counter>,
    /// Total number of buffers retained after being freed.
    returned: Family<SizeClassLabel, Counter>,
    /// Total number of freed buffers dropped by a full class.
    dropped: Family<SizeClassLabel, Counter>,
    /// Number of idle buffers held by a class.
    available: Family<SizeClassLabel, Gauge>,
    /// Total number of requests larger than the largest class.
    oversized: Counter,
    /// Total number of freed buffers that matched no class.
    rejected: Counter,
}

impl Metrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "bytespool_allocations",
            "Total number of allocations served from a size class",
            self.allocations.clone(),
        );
        registry.register(
            "bytespool_created",
            "Total number of buffers created because a size class was empty",
            self.created.clone(),
        );
        registry.register(
            "bytespool_returned",
            "Total number of buffers retained by a size class after being freed",
            self.returned.clone(),
        );
        registry.register(
            "bytespool_dropped",
            "Total number of freed buffers dropped because a size class was full",
            self.dropped.clone(),
        );
        registry.register(
            "bytespool_available",
            "Number of idle buffers held by a size class",
            self.available.clone(),
        );
        registry.register(
            "bytespool_oversized",
            "Total number of allocation requests exceeding the largest size class",
            self.oversized.clone(),
        );
        registry.register(
            "bytespool_rejected",
            "Total number of freed buffers whose length matched no size class",
            self.rejected.clone(),
        );
    }

    /// Returns handles to the metrics of one class.
    fn class(&self, size: usize) -> ClassMetrics {
        let label = SizeClassLabel {
            size_class: size as u64,
        };
        ClassMetrics {
            allocations: self.allocations.get_or_create(&label).clone(),
            created: self.created.get_or_create(&label).clone(),
            returned: self.returned.get_or_create(&label).clone(),
            dropped: self.dropped.get_or_create(&label).clone(),
            available: self.available.get_or_create(&label).clone(),
        }
    }
}

/// Per-class metric handles, resolved once so the hot path skips label lookup.
struct ClassMetrics {
    allocations: Counter,
    created: Counter,
    returned: Counter,
    dropped: Counter,
    available: Gauge,
}

/// Per-size-class state.
struct SizeClass {
    /// The buffer size for this class.
    size: usize,
    /// Idle buffers of exactly `size` bytes.
    recycler: Box<dyn Recycler<Item = Vec<u8>>>,
    metrics: ClassMetrics,
}

impl SizeClass {
    /// Returns a buffer of exactly `size` bytes, reusing an idle one if possible.
    fn get(&self) -> Vec<u8> {
        if let Some(buf) = self.recycler.take() {
            self.metrics.available.dec();
            if buf.len() == self.size {
                return buf;
            }
            debug!(
                len = buf.len(),
                size = self.size,
                "recycler returned buffer of wrong size"
            );
            return self.build();
        }
        let buf = self.recycler.build();
        if buf.len() == self.size {
            return buf;
        }
        debug!(
            len = buf.len(),
            size = self.size,
            "recycler built buffer of wrong size"
        );
        self.build()
    }

    fn build(&self) -> Vec<u8> {
        self.metrics.created.inc();
        vec![0u8; self.size]
    }
}

/// Internal state of the pool.
struct Inner {
    config: Config,
    classes: Vec<SizeClass>,
    metrics: Metrics,
}

/// A pool of reusable byte buffers organized in power-of-two size classes.
///
/// Clones share the same classes.
#[derive(Clone)]
pub struct SizedPool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SizedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizedPool")
            .field("config", &self.inner.config)
            .field("num_classes", &self.inner.classes.len())
            .finish()
    }
}

impl Default for SizedPool {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl SizedPool {
    /// Creates a pool whose classes are bounded [Freelist]s.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: Config) -> Self {
        let max_per_class = config.max_per_class;
        Self::with_recycler(config, |factory| Freelist::new(max_per_class, factory))
    }

    /// Creates a pool whose classes are built by `make`.
    ///
    /// `make` is called once per class with a factory that builds zeroed
    /// buffers of exactly the class size. Recyclers should only return buffers
    /// obtained from that factory or previously offered to them; a buffer of
    /// any other length is dropped and replaced by a fresh one of the class
    /// size.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn with_recycler<R, F>(config: Config, mut make: F) -> Self
    where
        R: Recycler<Item = Vec<u8>> + 'static,
        F: FnMut(Factory<Vec<u8>>) -> R,
    {
        config.validate();

        let metrics = Metrics::default();
        let mut classes = Vec::with_capacity(config.num_classes.get());
        for i in 0..config.num_classes.get() {
            let size = config.class_size(i);
            let class_metrics = metrics.class(size);
            let created = class_metrics.created.clone();
            let factory: Factory<Vec<u8>> = Box::new(move || {
                created.inc();
                vec![0u8; size]
            });
            let class = SizeClass {
                size,
                recycler: Box::new(make(factory)),
                metrics: class_metrics,
            };
            if config.prefill {
                let buffers: Vec<_> = (0..config.max_per_class.get())
                    .map(|_| class.recycler.get())
                    .collect();
                for buffer in buffers {
                    class.recycler.put(buffer);
                }
                class
                    .metrics
                    .available
                    .set(class.recycler.len() as i64);
            }
            classes.push(class);
        }

        Self {
            inner: Arc::new(Inner {
                config,
                classes,
                metrics,
            }),
        }
    }

    /// Registers the pool metrics with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        self.inner.metrics.register(registry);
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the number of idle buffers held by class `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a class of this pool.
    pub fn available(&self, index: usize) -> usize {
        self.inner.classes[index].recycler.len()
    }

    /// Allocates a buffer whose view is exactly `size` bytes.
    ///
    /// The buffer comes from the smallest class that fits `size`. If `size`
    /// exceeds the largest class, a buffer of exactly `size` bytes is allocated
    /// outside the pool instead; [Self::free] will not accept it.
    ///
    /// Use [Self::try_alloc] if you need to distinguish between pooled and
    /// unmanaged allocations.
    pub fn alloc(&self, size: usize) -> Origin {
        self.try_alloc(size).unwrap_or_else(|err| {
            debug!(%err, "allocating outside of pool");
            Origin::new(vec![0u8; size], size)
        })
    }

    /// Attempts to allocate a pooled buffer whose view is exactly `size` bytes.
    ///
    /// Unlike [Self::alloc], this method does not fall back to an unmanaged
    /// allocation.
    ///
    /// # Errors
    ///
    /// - [Error::Oversized]: `size` exceeds the largest class
    pub fn try_alloc(&self, size: usize) -> Result<Origin, Error> {
        let Some(index) = self.inner.config.class_index(size) else {
            self.inner.metrics.oversized.inc();
            return Err(Error::Oversized {
                requested: size,
                max: self.inner.config.max_size(),
            });
        };

        let class = &self.inner.classes[index];
        let buf = class.get();
        class.metrics.allocations.inc();
        Ok(Origin::new(buf, size))
    }

    /// Returns `origin` to the class matching its capacity.
    ///
    /// Buffers whose capacity is smaller than the first class, larger than the
    /// last class, or not a power of two are dropped and [Freed::NotPooled] is
    /// returned. The pool is unaffected by such calls.
    ///
    /// The view length is irrelevant: only the full storage is classified.
    pub fn free(&self, origin: Origin) -> Freed {
        let buf = origin.into_storage();
        let Some(index) = self.inner.config.pooled_index(buf.len()) else {
            self.inner.metrics.rejected.inc();
            debug!(len = buf.len(), "buffer matches no size class");
            return Freed::NotPooled;
        };

        let class = &self.inner.classes[index];
        if class.recycler.put(buf) {
            class.metrics.returned.inc();
            class.metrics.available.inc();
        } else {
            class.metrics.dropped.inc();
            trace!(size = class.size, "size class full, dropping buffer");
        }
        Freed::Pooled(index)
    }

    /// Reads exactly `size` bytes from `reader` into a pooled buffer.
    ///
    /// The buffer is freed before returning if the read fails.
    pub fn read_exact<R: Read>(&self, mut reader: R, size: usize) -> io::Result<ScopedBuffer> {
        let mut origin = self.alloc(size);
        if let Err(err) = reader.read_exact(origin.view_mut()) {
            self.free(origin);
            return Err(err);
        }
        Ok(ScopedBuffer::from_origin(self.clone(), origin))
    }
}
