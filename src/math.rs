//! Math rasterization with a process-lifetime cache.
//!
//! The typesetting engine sits behind [`Typesetter`]. [`MathRasterizer`]
//! owns the cache: lookups are keyed on the trimmed expression plus the
//! display flag, entries are created on the first miss and never mutated,
//! and an optional [`EvictionPolicy::Lru`] bounds memory without changing
//! results.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::{Condvar, Mutex, RwLock};
use pulldown_latex::{
    Parser, Storage,
    config::{DisplayMode, RenderConfig},
    mathml::push_mathml,
};
use serde::Deserialize;
use tracing::{trace, warn};

use crate::error::RasterError;

/// Canvas and font parameters for one math mode.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct RasterParams {
    pub font_size_px: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl RasterParams {
    pub const fn inline() -> Self {
        Self {
            font_size_px: 12.0,
            canvas_width: 450,
            canvas_height: 45,
        }
    }

    pub const fn display() -> Self {
        Self {
            font_size_px: 17.0,
            canvas_width: 1500,
            canvas_height: 105,
        }
    }
}

/// Output of the typesetting engine for one expression.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedMath {
    pub expression: String,
    pub display: bool,
    /// Engine payload. [`LatexTypesetter`] produces MathML.
    pub markup: String,
    pub width: u32,
    pub height: u32,
    pub font_size_px: f32,
}

pub trait Typesetter: Send + Sync {
    fn typeset(
        &self,
        expr: &str,
        display: bool,
        params: &RasterParams,
    ) -> Result<RenderedMath, RasterError>;
}

/// LaTeX to MathML via `pulldown-latex`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LatexTypesetter;

impl Typesetter for LatexTypesetter {
    fn typeset(
        &self,
        expr: &str,
        display: bool,
        params: &RasterParams,
    ) -> Result<RenderedMath, RasterError> {
        let storage = Storage::new();
        let parser = Parser::new(expr, &storage);
        let config = RenderConfig {
            display_mode: if display {
                DisplayMode::Block
            } else {
                DisplayMode::Inline
            },
            ..Default::default()
        };

        let events: Vec<_> = parser.collect();
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| e.as_ref().err().map(|err| err.to_string()))
            .collect();
        if !errors.is_empty() {
            return Err(RasterError::Rejected {
                expr: expr.to_string(),
                message: errors.join("; "),
            });
        }

        let mut mathml = String::new();
        push_mathml(&mut mathml, events.into_iter(), config).map_err(|err| {
            RasterError::Rejected {
                expr: expr.to_string(),
                message: err.to_string(),
            }
        })?;

        let (width, height) = estimate_extent(expr, params);
        Ok(RenderedMath {
            expression: expr.to_string(),
            display,
            markup: mathml,
            width,
            height,
            font_size_px: params.font_size_px,
        })
    }
}

/// Rough pixel extent: command names count as one glyph, grouping and
/// script markers count as none, `\\` starts a new row.
fn estimate_extent(expr: &str, params: &RasterParams) -> (u32, u32) {
    let mut glyphs = 0usize;
    let mut rows = 1u32;
    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.peek() == Some(&'\\') {
                    chars.next();
                    rows += 1;
                    continue;
                }
                while chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                    chars.next();
                }
                glyphs += 1;
            }
            '{' | '}' | '^' | '_' | '&' => {}
            c if c.is_whitespace() => {}
            _ => glyphs += 1,
        }
    }
    let glyph_width = params.font_size_px * 0.6;
    let width = ((glyphs.max(1) as f32) * glyph_width).ceil() as u32;
    (
        width.clamp(1, params.canvas_width.max(1)),
        params.canvas_height.max(1) * rows,
    )
}

/// Cache key: the expression with surrounding whitespace removed, plus the
/// display flag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MathKey {
    pub expression: String,
    pub display: bool,
}

impl MathKey {
    pub fn new(expr: &str, display: bool) -> Self {
        Self {
            expression: expr.trim().to_string(),
            display,
        }
    }
}

/// Shared, immutable handle to a rendered expression. Clones are cheap and
/// compare equal to the handle they came from.
#[derive(Clone, Debug)]
pub struct ImageHandle {
    id: u64,
    image: Arc<RenderedMath>,
}

impl ImageHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn image(&self) -> &RenderedMath {
        &self.image
    }

    pub fn expression(&self) -> &str {
        &self.image.expression
    }

    pub fn display(&self) -> bool {
        self.image.display
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageHandle {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Unbounded,
    Lru { capacity: NonZeroUsize },
}

enum CacheStore {
    Unbounded(HashMap<MathKey, ImageHandle>),
    Lru(LruCache<MathKey, ImageHandle>),
}

pub struct MathCache {
    store: RwLock<CacheStore>,
}

impl MathCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        let store = match policy {
            EvictionPolicy::Unbounded => CacheStore::Unbounded(HashMap::new()),
            EvictionPolicy::Lru { capacity } => CacheStore::Lru(LruCache::new(capacity)),
        };
        Self {
            store: RwLock::new(store),
        }
    }

    /// Unbounded lookups share the read lock. LRU lookups take the write
    /// lock because a hit refreshes recency.
    pub fn get(&self, key: &MathKey) -> Option<ImageHandle> {
        {
            let store = self.store.read();
            if let CacheStore::Unbounded(map) = &*store {
                return map.get(key).cloned();
            }
        }
        match &mut *self.store.write() {
            CacheStore::Lru(lru) => lru.get(key).cloned(),
            CacheStore::Unbounded(map) => map.get(key).cloned(),
        }
    }

    /// Inserts `handle` unless the key is already present, returning the
    /// handle that ends up cached. Racing inserts converge on the first one.
    pub fn insert_if_absent(&self, key: MathKey, handle: ImageHandle) -> ImageHandle {
        match &mut *self.store.write() {
            CacheStore::Unbounded(map) => map.entry(key).or_insert(handle).clone(),
            CacheStore::Lru(lru) => {
                if let Some(existing) = lru.get(&key) {
                    return existing.clone();
                }
                lru.put(key, handle.clone());
                handle
            }
        }
    }

    /// Membership test that leaves LRU recency untouched.
    pub fn contains(&self, key: &MathKey) -> bool {
        match &*self.store.read() {
            CacheStore::Unbounded(map) => map.contains_key(key),
            CacheStore::Lru(lru) => lru.contains(key),
        }
    }

    pub fn len(&self) -> usize {
        match &*self.store.read() {
            CacheStore::Unbounded(map) => map.len(),
            CacheStore::Lru(lru) => lru.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub cache: EvictionPolicy,
    /// How long a caller waits for the engine. `Some(0)` or `None` waits
    /// indefinitely.
    pub timeout_ms: Option<u64>,
    pub inline: RasterParams,
    pub display: RasterParams,
}

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            cache: EvictionPolicy::default(),
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            inline: RasterParams::inline(),
            display: RasterParams::display(),
        }
    }
}

impl RasterConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn params(&self, display: bool) -> &RasterParams {
        if display { &self.display } else { &self.inline }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub engine_calls: u64,
    pub entries: usize,
}

/// Cached front end to a [`Typesetter`]. Clones share the cache.
#[derive(Clone)]
pub struct MathRasterizer {
    inner: Arc<RasterizerInner>,
}

struct RasterizerInner {
    engine: Box<dyn Typesetter>,
    cache: MathCache,
    config: RasterConfig,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    engine_calls: AtomicU64,
    /// Keys with an engine call under way. Later callers wait on the
    /// existing call instead of starting another.
    inflight: Mutex<HashMap<MathKey, Arc<InFlight>>>,
}

/// Result slot for one engine call.
#[derive(Default)]
struct InFlight {
    result: Mutex<Option<Result<ImageHandle, RasterError>>>,
    ready: Condvar,
}

impl InFlight {
    fn complete(&self, result: Result<ImageHandle, RasterError>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    /// `None` if `limit` elapses first.
    fn wait(&self, limit: Option<Duration>) -> Option<Result<ImageHandle, RasterError>> {
        let mut slot = self.result.lock();
        match limit {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while slot.is_none() {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while slot.is_none() {
                    self.ready.wait(&mut slot);
                }
            }
        }
        slot.clone()
    }
}

enum Claim {
    Cached(ImageHandle),
    Owner(Arc<InFlight>),
    Follower(Arc<InFlight>),
}

impl MathRasterizer {
    pub fn new(engine: impl Typesetter + 'static, config: RasterConfig) -> Self {
        Self {
            inner: Arc::new(RasterizerInner {
                engine: Box::new(engine),
                cache: MathCache::new(config.cache),
                config,
                next_id: AtomicU64::new(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                engine_calls: AtomicU64::new(0),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &MathCache {
        &self.inner.cache
    }

    /// Returns the cached handle for `(expr.trim(), display)`, rendering it
    /// on a miss. Failures are returned, not cached. At most one engine call
    /// per key runs at a time; concurrent callers share its result.
    pub fn render(&self, expr: &str, display: bool) -> Result<ImageHandle, RasterError> {
        let key = MathKey::new(expr, display);
        if let Some(handle) = self.inner.cache.get(&key) {
            return Ok(self.hit(&key, handle));
        }

        match self.inner.claim(&key) {
            Claim::Cached(handle) => Ok(self.hit(&key, handle)),
            Claim::Follower(job) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                trace!(
                    expr = %key.expression,
                    display = key.display,
                    "math render in flight"
                );
                self.await_job(&key, &job)
            }
            Claim::Owner(job) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                trace!(expr = %key.expression, display = key.display, "math cache miss");
                match self.inner.config.timeout() {
                    Some(_) => self.render_bounded(key, job),
                    None => self.inner.run(key, &job),
                }
            }
        }
    }

    fn hit(&self, key: &MathKey, handle: ImageHandle) -> ImageHandle {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        trace!(expr = %key.expression, display = key.display, "math cache hit");
        handle
    }

    /// Runs the engine on a helper thread and stops waiting after the
    /// configured timeout. A late result is still cached by the helper.
    fn render_bounded(&self, key: MathKey, job: Arc<InFlight>) -> Result<ImageHandle, RasterError> {
        let inner = Arc::clone(&self.inner);
        let (helper_key, helper_job) = (key.clone(), Arc::clone(&job));
        let spawned = thread::Builder::new()
            .name("math-raster".to_string())
            .spawn(move || {
                let _ = inner.run(helper_key, &helper_job);
            });
        if let Err(err) = spawned {
            warn!(%err, "could not start math worker");
            let err = RasterError::EngineUnavailable;
            self.inner.finish(&key, &job, Err(err.clone()));
            return Err(err);
        }
        self.await_job(&key, &job)
    }

    fn await_job(&self, key: &MathKey, job: &InFlight) -> Result<ImageHandle, RasterError> {
        let limit = self.inner.config.timeout();
        job.wait(limit).unwrap_or_else(|| {
            let waited = limit.unwrap_or_default();
            warn!(expr = %key.expression, ?waited, "math engine timed out");
            Err(RasterError::Timeout {
                expr: key.expression.clone(),
                waited,
            })
        })
    }

    /// Number of keys with an engine call under way.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            engine_calls: self.inner.engine_calls.load(Ordering::Relaxed),
            entries: self.inner.cache.len(),
        }
    }
}

impl Default for MathRasterizer {
    fn default() -> Self {
        Self::new(LatexTypesetter, RasterConfig::default())
    }
}

impl RasterizerInner {
    /// Rechecks the cache under the in-flight lock so a call that finished
    /// between the caller's lookup and here is not repeated.
    fn claim(&self, key: &MathKey) -> Claim {
        let mut inflight = self.inflight.lock();
        if let Some(job) = inflight.get(key) {
            return Claim::Follower(Arc::clone(job));
        }
        if let Some(handle) = self.cache.get(key) {
            return Claim::Cached(handle);
        }
        let job = Arc::new(InFlight::default());
        inflight.insert(key.clone(), Arc::clone(&job));
        Claim::Owner(job)
    }

    fn run(&self, key: MathKey, job: &InFlight) -> Result<ImageHandle, RasterError> {
        let result = self.rasterize(key.clone());
        self.finish(&key, job, result.clone());
        result
    }

    /// Publishes the result to waiters, then releases the key. Successful
    /// results are already cached at this point.
    fn finish(&self, key: &MathKey, job: &InFlight, result: Result<ImageHandle, RasterError>) {
        job.complete(result);
        self.inflight.lock().remove(key);
    }

    fn rasterize(&self, key: MathKey) -> Result<ImageHandle, RasterError> {
        let params = self.config.params(key.display);
        self.engine_calls.fetch_add(1, Ordering::Relaxed);
        let image = self
            .engine
            .typeset(&key.expression, key.display, params)
            .inspect_err(|err| warn!(%err, "math rasterization failed"))?;
        let handle = ImageHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            image: Arc::new(image),
        };
        Ok(self.cache.insert_if_absent(key, handle))
    }
}
