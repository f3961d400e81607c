//! Shared control state and the validation scheduler
//!
//! [`ControlCore`] holds everything the three control kinds have in common.
//! [`Scheduler`] runs a control's validators with a request counter:
//!
//! - every request bumps the counter and replaces the pending validator set;
//! - only the request that finds the counter at zero starts a pass loop,
//!   later requests are picked up by that loop;
//! - the loop snapshots the counter, runs all validators concurrently and
//!   repeats while the counter moved, so only the most recent request is
//!   ever published.
//!
//! Each validator runs under a one-shot watcher. If reactive state the
//! validator read changes before the pass settles, the watcher requests a new
//! pass and the stale result is discarded by the counter check.

use super::{AbstractControl, Control, ControlKind};
use crate::error::FormError;
use crate::event::{combine_errors, EventLists, ValidationEvent};
use crate::validator::{Validatable, ValidationFuture, Validator};
use futures::FutureExt;
use reform_core::reactive::{batch, reaction, untracked, when, Reaction, Signal};
use reform_core::Notifier;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::oneshot;

/// State shared by every control kind
pub struct ControlCore {
    kind: ControlKind,
    is_active: Signal<bool>,
    in_processing: Signal<bool>,
    errors: Signal<Rc<[ValidationEvent]>>,
    warnings: Signal<Rc<[ValidationEvent]>>,
    information_messages: Signal<Rc<[ValidationEvent]>>,
    successes: Signal<Rc<[ValidationEvent]>>,
    server_errors: Signal<Rc<[String]>>,
    fault: Signal<Option<FormError>>,
    additional_data: RefCell<Option<serde_json::Value>>,
    on_change: Notifier,
    /// Feeds `is_active` from the activation predicate
    activation: Option<Reaction>,
    /// Watchers of the validators of the current pass
    watchers: RefCell<Vec<Reaction>>,
    /// Reactions owned by the control until disposal
    subscriptions: RefCell<Vec<Reaction>>,
    disposed: Cell<bool>,
}

impl std::fmt::Debug for ControlCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCore")
            .field("kind", &self.kind)
            .field("active", &self.is_active.get_untracked())
            .field("processing", &self.in_processing.get_untracked())
            .field("errors", &self.errors.get_untracked().len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

impl ControlCore {
    pub(crate) fn new(
        kind: ControlKind,
        activate: Option<Rc<dyn Fn() -> bool>>,
        additional_data: Option<serde_json::Value>,
    ) -> Self {
        let initial = activate.as_ref().map_or(true, |predicate| untracked(|| predicate()));
        let is_active = Signal::new(initial);

        let activation = activate.map(|predicate| {
            let target = is_active.clone();
            reaction(move || predicate(), move |active| target.set(active))
        });

        Self {
            kind,
            is_active,
            in_processing: Signal::new(false),
            errors: Signal::new(Rc::from([])),
            warnings: Signal::new(Rc::from([])),
            information_messages: Signal::new(Rc::from([])),
            successes: Signal::new(Rc::from([])),
            server_errors: Signal::new(Rc::from([])),
            fault: Signal::new(None),
            additional_data: RefCell::new(additional_data),
            on_change: Notifier::new(),
            activation,
            watchers: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn active(&self) -> bool {
        self.is_active.get()
    }

    pub(crate) fn active_signal(&self) -> Signal<bool> {
        self.is_active.clone()
    }

    /// Own validation pass in flight (ignores children)
    pub fn in_processing(&self) -> bool {
        self.in_processing.get()
    }

    pub(crate) fn set_processing(&self, processing: bool) {
        self.in_processing.set_if_changed(processing);
    }

    pub fn errors(&self) -> Rc<[ValidationEvent]> {
        self.errors.get()
    }

    pub fn warnings(&self) -> Rc<[ValidationEvent]> {
        self.warnings.get()
    }

    pub fn information_messages(&self) -> Rc<[ValidationEvent]> {
        self.information_messages.get()
    }

    pub fn successes(&self) -> Rc<[ValidationEvent]> {
        self.successes.get()
    }

    pub fn server_errors(&self) -> Rc<[String]> {
        self.server_errors.get()
    }

    pub fn set_server_errors(&self, errors: Vec<String>) {
        self.server_errors.set(errors.into());
    }

    pub(crate) fn clear_server_errors(&self) {
        if !self.server_errors.with_untracked(|errors| errors.is_empty()) {
            self.server_errors.set(Rc::from([]));
        }
    }

    /// Own errors or server errors are present
    pub(crate) fn has_own_errors(&self) -> bool {
        !self.errors.with(|errors| errors.is_empty())
            || !self.server_errors.with(|errors| errors.is_empty())
    }

    pub fn fault(&self) -> Option<FormError> {
        self.fault.get()
    }

    pub fn additional_data(&self) -> Option<serde_json::Value> {
        self.additional_data.borrow().clone()
    }

    pub fn set_additional_data(&self, data: Option<serde_json::Value>) {
        *self.additional_data.borrow_mut() = data;
    }

    pub fn on_change(&self) -> &Notifier {
        &self.on_change
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Keep `reaction` alive until the control is disposed
    pub(crate) fn own(&self, reaction: Reaction) {
        self.subscriptions.borrow_mut().push(reaction);
    }

    fn apply_events(&self, lists: EventLists) {
        batch(|| {
            self.errors.set(lists.errors);
            self.warnings.set(lists.warnings);
            self.information_messages.set(lists.information_messages);
            self.successes.set(lists.successes);
            self.fault.set_if_changed(None);
        });
    }

    pub(crate) fn release_watchers(&self) {
        let watchers = std::mem::take(&mut *self.watchers.borrow_mut());
        drop(watchers);
    }

    /// Call `validator`, tracking what it reads (during the call and every
    /// poll) into a fresh watcher that fires `on_retrigger` once.
    pub(crate) fn execute_tracked<C: 'static>(
        &self,
        control: &C,
        validator: &Validator<C>,
        on_retrigger: Rc<dyn Fn()>,
    ) -> ValidationFuture {
        let watcher = Reaction::watcher(move || on_retrigger());
        let Some(tracker) = watcher.tracker() else {
            return validator.call(control);
        };
        let pending = tracker.track(|| validator.call(control));
        self.watchers.borrow_mut().push(watcher);
        tracker.wrap(pending).boxed_local()
    }

    /// Release every reaction and listener. Idempotent.
    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        tracing::debug!(kind = ?self.kind, "disposing control");

        if let Some(activation) = &self.activation {
            activation.dispose();
        }
        self.release_watchers();
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
        self.on_change.clear();
        self.set_processing(false);
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// How a validation pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// Results were published to the event lists
    Settled,
    /// A validator failed; the event lists were left untouched
    Failed,
}

/// The latest validation request
pub(crate) struct PassRequest<C> {
    pub validators: Rc<[Validator<C>]>,
    /// Called by a validator watcher when tracked state changes
    pub on_retrigger: Rc<dyn Fn()>,
    /// Called once the pass is published
    pub after_check: Rc<dyn Fn(PassOutcome)>,
}

impl<C> Clone for PassRequest<C> {
    fn clone(&self) -> Self {
        Self {
            validators: self.validators.clone(),
            on_retrigger: self.on_retrigger.clone(),
            after_check: self.after_check.clone(),
        }
    }
}

/// Coalesces validation requests into one authoritative pass at a time
pub(crate) struct Scheduler<C> {
    requests: Cell<u64>,
    latest: RefCell<Option<PassRequest<C>>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            requests: Cell::new(0),
            latest: RefCell::new(None),
        }
    }
}

impl<C: Validatable> Scheduler<C> {
    /// Request a pass with `request`.
    ///
    /// Must be called from within a `tokio::task::LocalSet`.
    pub(crate) fn request_validation(self: &Rc<Self>, control: &C, request: PassRequest<C>) {
        let core = control.core();
        if core.is_disposed() {
            return;
        }

        let in_flight = self.requests.get() != 0;
        self.requests.set(self.requests.get() + 1);
        let previous = self.latest.replace(Some(request));
        drop(previous);

        if in_flight {
            tracing::trace!(kind = ?core.kind(), requests = self.requests.get(), "validation request coalesced");
            return;
        }

        // The settled pass's watchers must not fire for the change that
        // caused this request.
        core.release_watchers();
        tokio::task::spawn_local(run_passes(self.clone(), control.clone()));
    }
}

async fn run_passes<C: Validatable>(scheduler: Rc<Scheduler<C>>, control: C) {
    let mut passes = 0u32;
    loop {
        let snapshot = scheduler.requests.get();
        let core = control.core();
        core.release_watchers();

        let Some(request) = scheduler.latest.borrow().clone() else {
            scheduler.requests.set(0);
            return;
        };
        passes += 1;

        let result = if core.is_active.get_untracked() {
            let pending: Vec<_> = request
                .validators
                .iter()
                .map(|validator| core.execute_tracked(&control, validator, request.on_retrigger.clone()))
                .collect();
            futures::future::try_join_all(pending).await.map(combine_errors)
        } else {
            Ok(Vec::new())
        };

        if core.is_disposed() {
            scheduler.requests.set(0);
            tracing::debug!(kind = ?core.kind(), "discarding validation pass of disposed control");
            return;
        }
        if scheduler.requests.get() != snapshot {
            continue;
        }
        scheduler.requests.set(0);

        match result {
            Ok(events) => {
                tracing::debug!(kind = ?core.kind(), passes, events = events.len(), "validation settled");
                batch(|| {
                    core.apply_events(EventLists::partition(events));
                    (request.after_check)(PassOutcome::Settled);
                });
            }
            Err(err) => {
                tracing::warn!(kind = ?core.kind(), error = %err, "validation pass failed");
                batch(|| {
                    core.fault.set(Some(err));
                    (request.after_check)(PassOutcome::Failed);
                });
            }
        }
        return;
    }
}

/// Resolves once `control` reports no validation in flight
pub(crate) async fn wait_for_idle(control: Control) {
    let (tx, rx) = oneshot::channel();
    let probe = control.clone();
    let _idle = when(
        move || !probe.processing(),
        move || {
            let _ = tx.send(());
        },
    );
    let _ = rx.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{FormControl, LeafOptions};
    use crate::tests::run_local;

    #[test]
    fn test_inactive_control_skips_validators() {
        run_local(async {
            let calls = Rc::new(Cell::new(0));
            let counter = calls.clone();
            let control = FormControl::new(
                String::new(),
                LeafOptions::new()
                    .validator(Validator::sync(move |_| {
                        counter.set(counter.get() + 1);
                        vec![ValidationEvent::error("nope")]
                    }))
                    .activate(|| false),
            );
            control.wait().await;

            assert_eq!(calls.get(), 0);
            assert!(control.errors().is_empty());
            assert!(control.valid());
            assert!(control.disabled());
        });
    }

    #[test]
    fn test_validator_dependency_restarts_pass() {
        run_local(async {
            let limit = Signal::new(3usize);
            let bound = limit.clone();
            let control = FormControl::new(
                "abcd".to_string(),
                LeafOptions::new().validator(Validator::sync(move |c: &FormControl<String>| {
                    if c.value().len() > bound.get() {
                        vec![ValidationEvent::error("too long")]
                    } else {
                        Vec::new()
                    }
                })),
            );
            control.wait().await;
            assert!(control.invalid());

            limit.set(10);
            assert!(control.processing());
            control.wait().await;
            assert!(control.valid());
        });
    }

    #[test]
    fn test_dispose_releases_state() {
        run_local(async {
            let control = FormControl::new(String::new(), LeafOptions::new());
            control.on_change().subscribe(|| {});
            control.dispose();
            control.dispose();

            assert!(control.is_disposed());
            assert!(control.on_change().is_empty());
            assert!(!control.processing());
            control.wait().await;
        });
    }
}
