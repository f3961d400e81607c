//! Leaf control holding a single value

use super::base::{wait_for_idle, ControlCore, PassOutcome, PassRequest, Scheduler};
use super::{AbstractControl, Control, ControlKind, FormValue, LeafOptions, SetterPolicy};
use crate::error::{FormError, Result};
use crate::validator::{Validatable, ValidationFuture, Validator};
use reform_core::reactive::{batch, observe, reaction, reaction_immediate, untracked, Reaction, Signal};
use serde::Deserialize;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Where a leaf takes its value from
pub enum ValueSource<T> {
    /// A fixed initial value
    Value(T),
    /// A reactive getter; every new value it yields is adopted
    Getter(Rc<dyn Fn() -> T>),
}

impl<T> ValueSource<T> {
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        ValueSource::Getter(Rc::new(getter))
    }
}

impl<T> From<T> for ValueSource<T> {
    fn from(value: T) -> Self {
        ValueSource::Value(value)
    }
}

/// A leaf control: one value plus dirty/touched/focused tracking
pub struct FormControl<T: FormValue> {
    inner: Rc<LeafInner<T>>,
}

struct LeafInner<T: FormValue> {
    core: ControlCore,
    value: Signal<T>,
    dirty: Signal<bool>,
    touched: Signal<bool>,
    focused: Signal<bool>,
    validators: Rc<[Validator<FormControl<T>>]>,
    on_change_value: Option<Rc<dyn Fn(&T)>>,
    on_change_valid_value: Option<Rc<dyn Fn(&T)>>,
    policy: SetterPolicy,
    initialized_value: Cell<bool>,
    initialized_active: Cell<bool>,
    /// Set once the first pass has settled
    settled_once: Cell<bool>,
    /// Observes the value getter, if any
    source: RefCell<Option<Reaction>>,
    scheduler: Rc<Scheduler<FormControl<T>>>,
}

impl<T: FormValue> Clone for FormControl<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: FormValue + std::fmt::Debug> std::fmt::Debug for FormControl<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormControl")
            .field("value", &self.inner.value.get_untracked())
            .field("core", &self.inner.core)
            .finish()
    }
}

impl<T: FormValue> FormControl<T> {
    /// Create a leaf with a fixed initial value.
    ///
    /// The first validation pass is scheduled immediately, so this must run
    /// inside a `tokio::task::LocalSet`.
    pub fn new(value: T, options: LeafOptions<T>) -> Self {
        Self::build(ValueSource::Value(value), options)
    }

    /// Create a leaf that adopts every new value `getter` produces
    pub fn with_getter<F>(getter: F, options: LeafOptions<T>) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(ValueSource::getter(getter), options)
    }

    fn build(source: ValueSource<T>, options: LeafOptions<T>) -> Self {
        let initial = match &source {
            ValueSource::Value(value) => value.clone(),
            ValueSource::Getter(getter) => untracked(|| getter()),
        };
        let LeafOptions {
            base,
            on_change_value,
            on_change_valid_value,
            policy,
        } = options;

        let control = FormControl {
            inner: Rc::new(LeafInner {
                core: ControlCore::new(ControlKind::Leaf, base.activate, base.additional_data),
                value: Signal::new(initial),
                dirty: Signal::new(false),
                touched: Signal::new(false),
                focused: Signal::new(false),
                validators: base.validators.into(),
                on_change_value,
                on_change_valid_value,
                policy,
                initialized_value: Cell::new(false),
                initialized_active: Cell::new(false),
                settled_once: Cell::new(false),
                source: RefCell::new(None),
                scheduler: Rc::default(),
            }),
        };

        let weak = control.downgrade();
        let active = control.inner.core.active_signal();
        control.inner.core.own(reaction(
            move || active.get(),
            move |_| {
                if let Some(control) = upgrade(&weak) {
                    control.on_active_changed();
                }
            },
        ));

        control.set_initial_value(source);
        control
    }

    fn downgrade(&self) -> Weak<LeafInner<T>> {
        Rc::downgrade(&self.inner)
    }

    /// Replace the value source. The new value is adopted (without marking
    /// the leaf dirty) and validated at once.
    pub fn set_initial_value(&self, source: impl Into<ValueSource<T>>) -> &Self {
        let previous = self.inner.source.borrow_mut().take();
        drop(previous);

        match source.into() {
            ValueSource::Value(value) => self.adopt(value, true),
            ValueSource::Getter(getter) => {
                let weak = self.downgrade();
                let mut first = true;
                let watch = reaction_immediate(
                    move || getter(),
                    move |value| {
                        if let Some(control) = upgrade(&weak) {
                            control.adopt(value, std::mem::replace(&mut first, false));
                        }
                    },
                );
                *self.inner.source.borrow_mut() = Some(watch);
            }
        }
        self
    }

    /// Current value (tracked)
    pub fn value(&self) -> T {
        self.inner.value.get()
    }

    /// Borrow the current value (tracked)
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.value.with(f)
    }

    /// Set the value as a user edit.
    ///
    /// Equal values are ignored. Otherwise `on_change_value` runs, the leaf
    /// becomes dirty, server errors are cleared, listeners are notified and a
    /// validation pass with the valid-value sink enabled is requested.
    pub fn set_value(&self, value: T) {
        let inner = &self.inner;
        if inner.core.is_disposed() || inner.value.with_untracked(|current| *current == value) {
            return;
        }

        batch(|| {
            inner.value.set(value);
            if let Some(callback) = &inner.on_change_value {
                let value = inner.value.get_untracked();
                untracked(|| callback(&value));
            }
            self.set_dirty(true);
            inner.core.clear_server_errors();
            inner.core.on_change().notify();
            self.check_internal_value(true);
        });
    }

    pub fn set_focused(&self, focused: bool) {
        if self.inner.focused.set_if_changed(focused) && !focused {
            self.inner.core.clear_server_errors();
        }
    }

    /// Re-validate (sink enabled) whenever anything `dependency` reads changes
    pub fn revalidate_when<F>(&self, dependency: F)
    where
        F: FnMut() + 'static,
    {
        let weak = self.downgrade();
        self.inner.core.own(observe(dependency, move || {
            if let Some(control) = upgrade(&weak) {
                control.check_internal_value(true);
            }
        }));
    }

    /// Resolves once the leaf has no validation pass in flight
    pub async fn wait(&self) {
        wait_for_idle(self.clone().into()).await;
    }

    fn is_initialized(&self) -> bool {
        self.inner.initialized_value.get() || self.inner.initialized_active.get()
    }

    /// Take `value` from the value source without marking the leaf dirty
    fn adopt(&self, value: T, force: bool) {
        let inner = &self.inner;
        if inner.core.is_disposed() {
            return;
        }
        if !force && inner.value.with_untracked(|current| *current == value) {
            return;
        }

        batch(|| {
            inner.value.set(value);
            inner.core.on_change().notify();
            let should_call = if self.is_initialized() {
                inner.policy.call_on_reinitialize
            } else {
                inner.policy.call_on_initialize
            };
            self.check_internal_value(should_call);
            inner.initialized_value.set(true);
        });
    }

    fn on_active_changed(&self) {
        let inner = &self.inner;
        batch(|| {
            inner.core.clear_server_errors();
            self.check_internal_value(self.is_initialized() || inner.policy.call_on_initialize);
            inner.initialized_active.set(true);
            inner.core.on_change().notify();
        });
    }

    fn check_internal_value(&self, should_call: bool) {
        let inner = &self.inner;
        if inner.core.is_disposed() {
            return;
        }
        inner.core.set_processing(true);
        inner.core.clear_server_errors();

        let weak = self.downgrade();
        let retrigger = weak.clone();
        let request = PassRequest {
            validators: inner.validators.clone(),
            on_retrigger: Rc::new(move || {
                if let Some(control) = upgrade(&retrigger) {
                    control.check_internal_value(true);
                }
            }),
            after_check: Rc::new(move |outcome: PassOutcome| {
                if let Some(control) = upgrade(&weak) {
                    control.after_check(should_call, outcome);
                }
            }),
        };
        inner.scheduler.request_validation(self, request);
    }

    fn after_check(&self, should_call: bool, outcome: PassOutcome) {
        let inner = &self.inner;
        let settled = outcome == PassOutcome::Settled;
        // Requests coalesced into the first pass cannot override the
        // initialize policy
        let should_call = if settled && !inner.settled_once.replace(true) {
            inner.policy.call_on_initialize
        } else {
            should_call
        };
        let allowed = inner.core.active() || inner.policy.call_when_inactive;
        let clean = inner.core.errors().is_empty();

        if settled && should_call && allowed && clean {
            if let Some(sink) = &inner.on_change_valid_value {
                let value = inner.value.get_untracked();
                untracked(|| sink(&value));
            }
        }
        inner.core.set_processing(false);
    }
}

fn upgrade<T: FormValue>(weak: &Weak<LeafInner<T>>) -> Option<FormControl<T>> {
    weak.upgrade().map(|inner| FormControl { inner })
}

impl<T: FormValue> AbstractControl for FormControl<T> {
    fn kind(&self) -> ControlKind {
        ControlKind::Leaf
    }

    fn core(&self) -> &ControlCore {
        &self.inner.core
    }

    fn processing(&self) -> bool {
        self.inner.core.in_processing()
    }

    fn invalid(&self) -> bool {
        self.inner.core.active() && self.inner.core.has_own_errors()
    }

    fn dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    fn touched(&self) -> bool {
        self.inner.touched.get()
    }

    fn focused(&self) -> bool {
        self.inner.focused.get()
    }

    fn set_dirty(&self, dirty: bool) {
        if self.inner.dirty.set_if_changed(dirty) {
            self.inner.core.clear_server_errors();
        }
    }

    fn set_touched(&self, touched: bool) {
        self.inner.touched.set_if_changed(touched);
    }

    fn children(&self) -> Vec<Control> {
        Vec::new()
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        self.inner
            .value
            .with_untracked(|value| serde_json::to_value(value))
            .map_err(FormError::conversion)
    }

    fn apply_json(&self, value: &serde_json::Value) -> Result<()> {
        if self.inner.core.is_disposed() {
            return Err(FormError::Disposed);
        }
        let value = T::deserialize(value).map_err(FormError::conversion)?;
        self.set_value(value);
        Ok(())
    }

    fn dispose(&self) {
        let source = self.inner.source.borrow_mut().take();
        drop(source);
        self.inner.core.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: FormValue> Validatable for FormControl<T> {
    fn execute_async_validation(&self, validator: &Validator<Self>) -> ValidationFuture {
        let weak = self.downgrade();
        self.inner.core.execute_tracked(
            self,
            validator,
            Rc::new(move || {
                if let Some(control) = upgrade(&weak) {
                    control.check_internal_value(true);
                }
            }),
        )
    }
}
