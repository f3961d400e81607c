//! Fine-grained reactive signal system
//!
//! A push-based observer graph with automatic dependency tracking:
//! - Signals push invalidation notifications to the reactions that read them
//! - Reactions re-run their tracked expression and fire an untracked effect
//! - Notifications are batched and flushed in FIFO order
//!
//! The graph lives in a thread local, so signals and reactions are `!Send`
//! and must stay on the thread that created them. This matches the
//! single-threaded cooperative scheduling form controls run under.
//!
//! ```rust
//! use reform_core::reactive::{reaction, Signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let count = Signal::new(1);
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let sink = seen.clone();
//! let source = count.clone();
//! let _watch = reaction(move || source.get() * 2, move |doubled| sink.borrow_mut().push(doubled));
//!
//! count.set(5);
//! count.set(5);
//! assert_eq!(*seen.borrow(), vec![10]);
//! ```

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

new_key_type! {
    /// Unique identifier for a signal
    pub struct SignalId;
    /// Unique identifier for a reaction
    pub struct ReactionId;
}

/// Upper bound on reaction runs in a single flush before the flush is abandoned
const MAX_FLUSH_ITERATIONS: usize = 100_000;

type Dependencies = SmallVec<[SignalId; 4]>;

/// Internal signal node storage
struct SignalNode {
    /// Version counter for change detection
    version: u64,
    /// Reactions to mark dirty on change
    subscribers: SmallVec<[ReactionId; 4]>,
}

/// Internal reaction node storage
struct ReactionNode {
    /// The reaction body; taken out of the node while it runs
    run: Option<Box<dyn FnMut()>>,
    /// Signals this reaction read during its last run
    dependencies: Dependencies,
    /// Whether the reaction is queued to run
    dirty: bool,
}

/// The reactive graph that tracks signal versions and subscriptions
struct ReactiveGraph {
    signals: SlotMap<SignalId, SignalNode>,
    reactions: SlotMap<ReactionId, ReactionNode>,
    /// Reactions waiting to run
    pending: VecDeque<ReactionId>,
    /// Current batch depth (> 0 means we're in a batch)
    batch_depth: u32,
    /// Set while the pending queue is being drained
    flushing: bool,
    /// Dependency collection frames; `None` marks an untracked scope
    tracking: Vec<Option<Dependencies>>,
    /// Global version counter
    global_version: u64,
}

thread_local! {
    static GRAPH: RefCell<ReactiveGraph> = RefCell::new(ReactiveGraph::new());
}

/// Run `f` with exclusive access to the thread's graph.
///
/// User closures are never invoked or dropped inside `f`.
fn with_graph<R>(f: impl FnOnce(&mut ReactiveGraph) -> R) -> R {
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Like [`with_graph`], but tolerates thread teardown. Used from `Drop` paths.
fn try_with_graph<R>(f: impl FnOnce(&mut ReactiveGraph) -> R) -> Option<R> {
    GRAPH
        .try_with(|graph| graph.try_borrow_mut().ok().map(|mut graph| f(&mut graph)))
        .ok()
        .flatten()
}

impl ReactiveGraph {
    fn new() -> Self {
        Self {
            signals: SlotMap::with_key(),
            reactions: SlotMap::with_key(),
            pending: VecDeque::new(),
            batch_depth: 0,
            flushing: false,
            tracking: Vec::new(),
            global_version: 0,
        }
    }

    fn record(&mut self, id: SignalId) {
        if let Some(Some(deps)) = self.tracking.last_mut() {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
    }

    /// Bump a signal's version and queue its subscribers.
    ///
    /// Returns whether the caller should flush.
    fn notify(&mut self, id: SignalId) -> bool {
        let Some(node) = self.signals.get_mut(id) else {
            return false;
        };
        node.version += 1;
        self.global_version += 1;

        let subscribers = node.subscribers.clone();
        for sub in subscribers {
            self.mark_dirty(sub);
        }

        self.batch_depth == 0 && !self.flushing
    }

    fn mark_dirty(&mut self, id: ReactionId) {
        if let Some(node) = self.reactions.get_mut(id) {
            if !node.dirty {
                node.dirty = true;
                self.pending.push_back(id);
            }
        }
    }

    /// Replace a reaction's dependency set with `deps`
    fn resubscribe(&mut self, id: ReactionId, deps: Dependencies) {
        let Some(node) = self.reactions.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut node.dependencies, deps.clone());

        for dep in old {
            if let Some(sig) = self.signals.get_mut(dep) {
                sig.subscribers.retain(|s| *s != id);
            }
        }
        for dep in deps {
            if let Some(sig) = self.signals.get_mut(dep) {
                if !sig.subscribers.contains(&id) {
                    sig.subscribers.push(id);
                }
            }
        }
    }

    /// Add `deps` to a reaction's dependency set
    fn subscribe(&mut self, id: ReactionId, deps: Dependencies) {
        let Some(node) = self.reactions.get_mut(id) else {
            return;
        };
        for dep in deps {
            let Some(sig) = self.signals.get_mut(dep) else {
                continue;
            };
            if !sig.subscribers.contains(&id) {
                sig.subscribers.push(id);
            }
            if !node.dependencies.contains(&dep) {
                node.dependencies.push(dep);
            }
        }
    }

    /// Remove a reaction, handing its node back so the caller can drop the
    /// body outside of the graph borrow.
    fn remove_reaction(&mut self, id: ReactionId) -> Option<ReactionNode> {
        let node = self.reactions.remove(id)?;
        for &dep in &node.dependencies {
            if let Some(sig) = self.signals.get_mut(dep) {
                sig.subscribers.retain(|s| *s != id);
            }
        }
        Some(node)
    }

    fn stats(&self) -> ReactiveStats {
        ReactiveStats {
            signal_count: self.signals.len(),
            reaction_count: self.reactions.len(),
            pending_reactions: self.pending.len(),
            global_version: self.global_version,
        }
    }
}

/// Statistics about the reactive graph of the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactiveStats {
    pub signal_count: usize,
    pub reaction_count: usize,
    pub pending_reactions: usize,
    pub global_version: u64,
}

/// Get statistics about the reactive graph of the current thread
pub fn stats() -> ReactiveStats {
    with_graph(|g| g.stats())
}

// =============================================================================
// SIGNALS
// =============================================================================

/// An observable value cell (cheap to clone, clones share the value)
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: SignalId,
    value: RefCell<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        let id = self.id;
        try_with_graph(|g| g.signals.remove(id));
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .finish()
    }
}

impl<T: Default> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Signal<T> {
    /// Create a new signal with an initial value
    pub fn new(initial: T) -> Self {
        let id = with_graph(|g| {
            g.signals.insert(SignalNode {
                version: 0,
                subscribers: SmallVec::new(),
            })
        });
        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(initial),
            }),
        }
    }

    /// Get the signal's internal ID
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// Borrow the current value, recording a dependency when tracking.
    ///
    /// `f` must not set this same signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let id = self.inner.id;
        with_graph(|g| g.record(id));
        f(&self.inner.value.borrow())
    }

    /// Borrow the current value without tracking it as a dependency
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value and notify subscribers, even if the value is equal
    pub fn set(&self, value: T) {
        let previous = self.inner.value.replace(value);
        self.notify();
        drop(previous);
    }

    /// Mutate the value in place and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.notify();
    }

    /// Get the version of the signal (for change detection)
    pub fn version(&self) -> u64 {
        let id = self.inner.id;
        with_graph(|g| g.signals.get(id).map(|n| n.version).unwrap_or_default())
    }

    fn notify(&self) {
        let id = self.inner.id;
        if with_graph(|g| g.notify(id)) {
            flush();
        }
    }
}

impl<T: Clone> Signal<T> {
    /// Get the current value, recording a dependency when tracking
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking it as a dependency
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq> Signal<T> {
    /// Set the value only if it differs from the current one.
    ///
    /// Returns `true` when subscribers were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

// =============================================================================
// SCOPES
// =============================================================================

/// Run `f` without recording any signal reads as dependencies
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    with_graph(|g| g.tracking.push(None));
    let result = f();
    with_graph(|g| g.tracking.pop());
    result
}

/// Run `f` in a batch - reactions won't run until the outermost batch ends
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    with_graph(|g| g.batch_depth += 1);
    let result = f();
    let should_flush = with_graph(|g| {
        g.batch_depth = g.batch_depth.saturating_sub(1);
        g.batch_depth == 0 && !g.flushing
    });
    if should_flush {
        flush();
    }
    result
}

/// Resets the flushing flag even if a reaction body unwinds
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        try_with_graph(|g| g.flushing = false);
    }
}

/// Drain the pending queue
fn flush() {
    let started = with_graph(|g| !std::mem::replace(&mut g.flushing, true));
    if !started {
        return;
    }
    let _guard = FlushGuard;

    let mut iterations = 0usize;
    while let Some(id) = with_graph(|g| g.pending.pop_front()) {
        iterations += 1;
        if iterations > MAX_FLUSH_ITERATIONS {
            let dropped = with_graph(|g| {
                let dropped = g.pending.len() + 1;
                g.pending.push_front(id);
                for id in g.pending.drain(..) {
                    if let Some(node) = g.reactions.get_mut(id) {
                        node.dirty = false;
                    }
                }
                dropped
            });
            tracing::error!(
                dropped,
                "reactive flush did not settle after {MAX_FLUSH_ITERATIONS} runs, abandoning"
            );
            break;
        }
        run_reaction(id);
    }
    tracing::trace!(iterations, "reactive flush complete");
}

/// Run a single reaction if it is still dirty
fn run_reaction(id: ReactionId) {
    let run = with_graph(|g| {
        let node = g.reactions.get_mut(id)?;
        if !node.dirty {
            return None;
        }
        node.dirty = false;
        node.run.take()
    });
    let Some(mut run) = run else {
        return;
    };

    with_graph(|g| g.tracking.push(Some(Dependencies::new())));
    run();
    let deps = with_graph(|g| g.tracking.pop()).flatten().unwrap_or_default();

    // The reaction may have disposed itself while running
    let orphan = with_graph(move |g| match g.reactions.get_mut(id) {
        Some(node) => {
            node.run = Some(run);
            g.resubscribe(id, deps);
            None
        }
        None => Some(run),
    });
    drop(orphan);
}

/// Insert a reaction and run it once synchronously
fn install(run: impl FnMut() + 'static) -> Reaction {
    let run: Box<dyn FnMut()> = Box::new(run);
    let id = with_graph(move |g| {
        g.reactions.insert(ReactionNode {
            run: Some(run),
            dependencies: Dependencies::new(),
            dirty: true,
        })
    });

    run_reaction(id);
    if with_graph(|g| g.batch_depth == 0 && !g.flushing) {
        flush();
    }

    Reaction::from_id(id)
}

// =============================================================================
// REACTIONS
// =============================================================================

/// Handle to a reaction; disposing (or dropping) it removes the reaction
#[derive(Debug)]
pub struct Reaction {
    id: Cell<Option<ReactionId>>,
}

impl Reaction {
    fn from_id(id: ReactionId) -> Self {
        Self {
            id: Cell::new(Some(id)),
        }
    }

    /// Create a one-shot watcher.
    ///
    /// The watcher starts without dependencies; reads made through its
    /// [`Tracker`] add them. The first change to any of them calls
    /// `on_change` (untracked) after which the watcher goes inert.
    pub fn watcher(on_change: impl FnOnce() + 'static) -> Self {
        let mut pending = Some(on_change);
        let run: Box<dyn FnMut()> = Box::new(move || {
            if let Some(on_change) = pending.take() {
                untracked(on_change);
            }
        });
        let id = with_graph(move |g| {
            g.reactions.insert(ReactionNode {
                run: Some(run),
                dependencies: Dependencies::new(),
                dirty: false,
            })
        });
        Self::from_id(id)
    }

    pub fn id(&self) -> Option<ReactionId> {
        self.id.get()
    }

    /// A handle for adding dependencies to this reaction, if still alive
    pub fn tracker(&self) -> Option<Tracker> {
        self.id.get().map(|id| Tracker { id })
    }

    pub fn is_disposed(&self) -> bool {
        self.id.get().is_none()
    }

    /// Remove the reaction from the graph. Idempotent.
    pub fn dispose(&self) {
        if let Some(id) = self.id.take() {
            let node = try_with_graph(|g| g.remove_reaction(id)).flatten();
            drop(node);
        }
    }
}

impl Drop for Reaction {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Records signal reads into a reaction's dependency set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracker {
    id: ReactionId,
}

impl Tracker {
    /// Run `f`, adding every signal it reads to the reaction's dependencies
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        with_graph(|g| g.tracking.push(Some(Dependencies::new())));
        let result = f();
        let id = self.id;
        with_graph(|g| {
            if let Some(Some(deps)) = g.tracking.pop() {
                g.subscribe(id, deps);
            }
        });
        result
    }

    /// Wrap a future so that every poll is tracked
    pub fn wrap<F: Future + Unpin>(self, future: F) -> Tracked<F> {
        Tracked {
            tracker: self,
            future,
        }
    }
}

/// A future whose polls record dependencies into a reaction
#[derive(Debug)]
pub struct Tracked<F> {
    tracker: Tracker,
    future: F,
}

impl<F: Future + Unpin> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let tracker = this.tracker;
        tracker.track(|| Pin::new(&mut this.future).poll(cx))
    }
}

/// Track `expression`; whenever its value changes, call `effect` with it.
///
/// The effect does not run for the initial value.
pub fn reaction<T, E, F>(expression: E, effect: F) -> Reaction
where
    T: Clone + PartialEq + 'static,
    E: FnMut() -> T + 'static,
    F: FnMut(T) + 'static,
{
    value_reaction(expression, effect, false)
}

/// Like [`reaction`], but the effect also runs for the initial value
pub fn reaction_immediate<T, E, F>(expression: E, effect: F) -> Reaction
where
    T: Clone + PartialEq + 'static,
    E: FnMut() -> T + 'static,
    F: FnMut(T) + 'static,
{
    value_reaction(expression, effect, true)
}

fn value_reaction<T, E, F>(mut expression: E, mut effect: F, fire_immediately: bool) -> Reaction
where
    T: Clone + PartialEq + 'static,
    E: FnMut() -> T + 'static,
    F: FnMut(T) + 'static,
{
    let mut last: Option<T> = None;
    let mut first = true;
    install(move || {
        let value = expression();
        let changed = last.as_ref() != Some(&value);
        let fire = if first { fire_immediately } else { changed };
        first = false;
        if changed {
            last = Some(value.clone());
        }
        if fire {
            untracked(|| effect(value));
        }
    })
}

/// Track `expression`; call `effect` after every dependency change,
/// whether or not anything observable changed.
pub fn observe<E, F>(mut expression: E, mut effect: F) -> Reaction
where
    E: FnMut() + 'static,
    F: FnMut() + 'static,
{
    let mut first = true;
    install(move || {
        expression();
        if !std::mem::replace(&mut first, false) {
            untracked(&mut effect);
        }
    })
}

/// Call `effect` once, the first time `predicate` holds
pub fn when<P, F>(mut predicate: P, effect: F) -> Reaction
where
    P: FnMut() -> bool + 'static,
    F: FnOnce() + 'static,
{
    let mut effect = Some(effect);
    install(move || {
        if effect.is_none() {
            return;
        }
        if predicate() {
            if let Some(effect) = effect.take() {
                untracked(effect);
            }
        }
    })
}
