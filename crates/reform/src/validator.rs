//! Validator functions and combinators
//!
//! A [`Validator<C>`] is an async function from a control to the events it
//! raises. Validators must not hold borrows of the control across an await
//! point; clone the handle (cheap) into the returned future instead.
//!
//! Combinators run their nested validators through
//! [`Validatable::execute_async_validation`], so reactive reads inside nested
//! validators still restart the owning control's validation pass.

use crate::control::AbstractControl;
use crate::error::Result;
use crate::event::{combine_errors, ValidationEvent, ValidationEventType};
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::rc::Rc;

/// The future a validator returns
pub type ValidationFuture = LocalBoxFuture<'static, Result<Vec<ValidationEvent>>>;

/// An async validation function for controls of type `C`
pub struct Validator<C: ?Sized>(Rc<dyn Fn(&C) -> ValidationFuture>);

impl<C: ?Sized> Clone for Validator<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: ?Sized> std::fmt::Debug for Validator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Validator").finish_non_exhaustive()
    }
}

impl<C: ?Sized + 'static> Validator<C> {
    pub fn new<F, Fut>(validate: F) -> Self
    where
        F: Fn(&C) -> Fut + 'static,
        Fut: Future<Output = Result<Vec<ValidationEvent>>> + 'static,
    {
        Self(Rc::new(move |control| validate(control).boxed_local()))
    }

    /// A validator that computes its events synchronously
    pub fn sync<F>(validate: F) -> Self
    where
        F: Fn(&C) -> Vec<ValidationEvent> + 'static,
    {
        Self(Rc::new(move |control| {
            future::ready(Ok(validate(control))).boxed_local()
        }))
    }

    pub fn call(&self, control: &C) -> ValidationFuture {
        (self.0)(control)
    }

    /// Rewrite every event this validator yields
    pub fn map_events<F>(self, map: F) -> Self
    where
        F: Fn(ValidationEvent) -> ValidationEvent + 'static,
    {
        let map = Rc::new(map);
        Self(Rc::new(move |control| {
            let pending = self.call(control);
            let map = map.clone();
            async move { Ok(pending.await?.into_iter().map(|e| map(e)).collect()) }.boxed_local()
        }))
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.map_events(move |mut event| {
            event.message = message.clone();
            event
        })
    }

    pub fn with_event_type(self, event_type: ValidationEventType) -> Self {
        self.map_events(move |mut event| {
            event.event_type = event_type;
            event
        })
    }

    pub fn with_key(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.map_events(move |mut event| {
            event.key = Some(key.clone());
            event
        })
    }
}

/// A control that can run nested validators against itself.
///
/// Reactive state read by a nested validator (while it is called and while
/// its future is polled) becomes a dependency of the current validation
/// pass; a change restarts the pass.
pub trait Validatable: AbstractControl + Clone + 'static {
    fn execute_async_validation(&self, validator: &Validator<Self>) -> ValidationFuture;
}

pub(crate) fn run_all<C: Validatable>(control: &C, validators: &[Validator<C>]) -> ValidationFuture {
    let pending: Vec<_> = validators
        .iter()
        .map(|validator| control.execute_async_validation(validator))
        .collect();
    async move { Ok(combine_errors(future::try_join_all(pending).await?)) }.boxed_local()
}

/// Run `validators` in order, stopping at the first one that yields events
pub fn sequential_check<C: Validatable>(validators: Vec<Validator<C>>) -> Validator<C> {
    let validators: Rc<[Validator<C>]> = validators.into();
    Validator::new(move |control: &C| {
        let control = control.clone();
        let validators = validators.clone();
        async move {
            for validator in validators.iter() {
                let events = control.execute_async_validation(validator).await?;
                if !events.is_empty() {
                    return Ok(events);
                }
            }
            Ok(Vec::new())
        }
    })
}

/// Run `validators` while `activate()` holds, `else_validators` otherwise.
///
/// `activate` is evaluated when the validator is called, so anything it reads
/// restarts the pass when it changes.
pub fn activate_validation<C, P>(
    activate: P,
    validators: Vec<Validator<C>>,
    else_validators: Vec<Validator<C>>,
) -> Validator<C>
where
    C: Validatable,
    P: Fn() -> bool + 'static,
{
    let validators: Rc<[Validator<C>]> = validators.into();
    let else_validators: Rc<[Validator<C>]> = else_validators.into();
    Validator(Rc::new(move |control: &C| {
        if activate() {
            run_all(control, &validators)
        } else {
            run_all(control, &else_validators)
        }
    }))
}
