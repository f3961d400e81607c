//! Plumbing shared by groups and arrays
//!
//! A composite listens to the `on_change` notifier of each of its children.
//! Any child change (and any change of the composite's own activation)
//! clears the composite's server errors, re-runs its own validators and
//! notifies its own listeners, so changes bubble up to the root.

use super::base::{ControlCore, PassOutcome, PassRequest, Scheduler};
use super::{AbstractControl, Control};
use crate::validator::{Validatable, ValidationFuture, Validator};
use reform_core::events::ListenerId;
use reform_core::reactive::{batch, observe, reaction};
use std::cell::RefCell;
use std::rc::Rc;

/// State every composite carries besides its children
pub(crate) struct CompositeState<C> {
    pub core: ControlCore,
    pub validators: Rc<[Validator<C>]>,
    pub scheduler: Rc<Scheduler<C>>,
    pub listeners: ChildListeners,
}

impl<C> CompositeState<C> {
    pub fn new(core: ControlCore, validators: Vec<Validator<C>>) -> Self {
        Self {
            core,
            validators: validators.into(),
            scheduler: Rc::default(),
            listeners: ChildListeners::default(),
        }
    }
}

/// A group or array
pub(crate) trait Composite: Validatable {
    type Handle: 'static;

    fn composite(&self) -> &CompositeState<Self>;

    fn downgrade(&self) -> Self::Handle;

    fn upgrade(handle: &Self::Handle) -> Option<Self>;
}

/// One listener per distinct child
#[derive(Default)]
pub(crate) struct ChildListeners {
    entries: RefCell<Vec<(Control, ListenerId)>>,
}

impl ChildListeners {
    fn contains(&self, child: &Control) -> bool {
        self.entries.borrow().iter().any(|(known, _)| known.ptr_eq(child))
    }

    /// Subscribe `parent` to `child` unless already subscribed
    pub fn attach<P: Composite>(&self, parent: &P, child: &Control) {
        if parent.core().is_disposed() || self.contains(child) {
            return;
        }
        let handle = parent.downgrade();
        let id = child.on_change().subscribe(move || {
            if let Some(parent) = P::upgrade(&handle) {
                child_changed(&parent);
            }
        });
        self.entries.borrow_mut().push((child.clone(), id));
    }

    /// Attach to every child in `children` and detach from every child not
    /// in it
    pub fn sync<P: Composite>(&self, parent: &P, children: &[Control]) {
        let stale = {
            let mut entries = self.entries.borrow_mut();
            let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|(known, _)| children.iter().any(|child| child.ptr_eq(known)));
            *entries = keep;
            stale
        };
        for (child, id) in stale {
            child.on_change().unsubscribe(id);
        }
        for child in children {
            self.attach(parent, child);
        }
    }

    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for (child, id) in entries {
            child.on_change().unsubscribe(id);
        }
    }
}

/// Wire up a freshly built composite: child listeners, activation tracking
/// and the first validation pass.
pub(crate) fn initialize<P: Composite>(parent: &P, children: &[Control]) {
    let state = parent.composite();
    for child in children {
        state.listeners.attach(parent, child);
    }

    let handle = parent.downgrade();
    let active = state.core.active_signal();
    state.core.own(reaction(
        move || active.get(),
        move |_| {
            if let Some(parent) = P::upgrade(&handle) {
                child_changed(&parent);
            }
        },
    ));

    check(parent);
}

/// Clear server errors, re-run the composite's validators and notify
pub(crate) fn child_changed<P: Composite>(parent: &P) {
    let core = &parent.composite().core;
    if core.is_disposed() {
        return;
    }
    batch(|| {
        core.clear_server_errors();
        check(parent);
        core.on_change().notify();
    });
}

/// Request a validation pass over the composite's own validators
pub(crate) fn check<P: Composite>(parent: &P) {
    let state = parent.composite();
    if state.core.is_disposed() {
        return;
    }
    state.core.set_processing(true);

    let handle = Rc::new(parent.downgrade());
    let retrigger = handle.clone();
    let request = PassRequest {
        validators: state.validators.clone(),
        on_retrigger: Rc::new(move || {
            if let Some(parent) = P::upgrade(&retrigger) {
                check(&parent);
            }
        }),
        after_check: Rc::new(move |_: PassOutcome| {
            if let Some(parent) = P::upgrade(&handle) {
                parent.composite().core.set_processing(false);
            }
        }),
    };
    state.scheduler.request_validation(parent, request);
}

/// Re-run the composite's validators whenever anything `dependency` reads
/// changes
pub(crate) fn revalidate_when<P, F>(parent: &P, dependency: F)
where
    P: Composite,
    F: FnMut() + 'static,
{
    let handle = parent.downgrade();
    parent.composite().core.own(observe(dependency, move || {
        if let Some(parent) = P::upgrade(&handle) {
            check(&parent);
        }
    }));
}

/// Run a nested validator against the composite under the current pass
pub(crate) fn execute<P: Composite>(parent: &P, validator: &Validator<P>) -> ValidationFuture {
    let handle = parent.downgrade();
    parent.composite().core.execute_tracked(
        parent,
        validator,
        Rc::new(move || {
            if let Some(parent) = P::upgrade(&handle) {
                check(&parent);
            }
        }),
    )
}

/// Own pass or any child's pass in flight
pub(crate) fn processing<'a, C>(core: &ControlCore, children: impl IntoIterator<Item = &'a C>) -> bool
where
    C: AbstractControl + 'a,
{
    core.in_processing() || children.into_iter().any(|child| child.processing())
}

/// Active with own errors, server errors or an invalid child
pub(crate) fn invalid<'a, C>(core: &ControlCore, children: impl IntoIterator<Item = &'a C>) -> bool
where
    C: AbstractControl + 'a,
{
    core.active() && (core.has_own_errors() || children.into_iter().any(|child| child.invalid()))
}

/// Release listeners and reactions, then dispose every child
pub(crate) fn dispose<C>(state: &CompositeState<C>, children: &[Control]) {
    if state.core.is_disposed() {
        return;
    }
    state.listeners.clear();
    state.core.dispose();
    for child in children {
        child.dispose();
    }
}
