//! Ordered, mutable list of child controls

use super::base::{wait_for_idle, ControlCore};
use super::composite::{self, Composite, CompositeState};
use super::{AbstractControl, ArrayItem, ArrayOptions, Control, ControlKind};
use crate::error::{FormError, Result};
use crate::validator::{Validatable, ValidationFuture, Validator};
use reform_core::reactive::{batch, Signal};
use std::any::Any;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

/// A control holding a list of children of one type.
///
/// Reads of the list are tracked. Every structural change notifies
/// listeners, re-runs the array's own validators and keeps the child
/// listeners in step with the list. Removed children are handed back to the
/// caller and are not disposed.
pub struct FormArray<C: ArrayItem = Control> {
    inner: Rc<ArrayInner<C>>,
}

pub(crate) struct ArrayInner<C: ArrayItem> {
    state: CompositeState<FormArray<C>>,
    controls: Signal<Vec<C>>,
}

impl<C: ArrayItem> Clone for FormArray<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: ArrayItem> std::fmt::Debug for FormArray<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormArray")
            .field("len", &self.inner.controls.with_untracked(Vec::len))
            .field("core", &self.inner.state.core)
            .finish()
    }
}

impl<C: ArrayItem> FormArray<C> {
    /// Create an array over `controls`.
    ///
    /// Must run inside a `tokio::task::LocalSet`; the first validation pass
    /// is scheduled immediately.
    pub fn new(controls: Vec<C>, options: ArrayOptions<C>) -> Self {
        let core = ControlCore::new(ControlKind::Array, options.activate, options.additional_data);
        let children = erase(&controls);
        let array = FormArray {
            inner: Rc::new(ArrayInner {
                state: CompositeState::new(core, options.validators),
                controls: Signal::new(controls),
            }),
        };
        composite::initialize(&array, &children);
        array
    }

    /// Resolves once no validation pass is in flight in this array
    pub async fn wait(&self) {
        wait_for_idle(self.clone().into()).await;
    }

    /// Apply a structural change, then resync listeners, clear server
    /// errors, revalidate and notify.
    fn mutate<R>(&self, change: impl FnOnce(&mut Vec<C>) -> R) -> R {
        let mut controls = self.inner.controls.get_untracked();
        let result = change(&mut controls);
        let children = erase(&controls);

        batch(|| {
            self.inner.controls.set(controls);
            self.inner.state.listeners.sync(self, &children);
            composite::child_changed(self);
        });
        result
    }

    pub fn push(&self, control: C) {
        self.mutate(|controls| controls.push(control));
    }

    pub fn extend(&self, controls: impl IntoIterator<Item = C>) {
        self.mutate(|list| list.extend(controls));
    }

    pub fn pop(&self) -> Option<C> {
        self.mutate(Vec::pop)
    }

    /// Remove and return the first child
    pub fn shift(&self) -> Option<C> {
        self.mutate(|controls| (!controls.is_empty()).then(|| controls.remove(0)))
    }

    /// Insert a child at the front
    pub fn unshift(&self, control: C) {
        self.mutate(|controls| controls.insert(0, control));
    }

    /// Insert at `index`, clamped to the length
    pub fn insert(&self, index: usize, control: C) {
        self.mutate(|controls| {
            let index = index.min(controls.len());
            controls.insert(index, control);
        });
    }

    pub fn remove(&self, index: usize) -> Option<C> {
        self.mutate(|controls| (index < controls.len()).then(|| controls.remove(index)))
    }

    /// Remove up to `delete_count` children starting at `start` and insert
    /// `items` in their place. Out-of-range bounds are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, items: impl IntoIterator<Item = C>) -> Vec<C> {
        self.mutate(|controls| {
            let start = start.min(controls.len());
            let end = start.saturating_add(delete_count).min(controls.len());
            controls.splice(start..end, items).collect()
        })
    }

    /// Remove every child
    pub fn clear(&self) -> Vec<C> {
        self.mutate(std::mem::take)
    }

    pub fn sort_by(&self, compare: impl FnMut(&C, &C) -> Ordering) {
        self.mutate(|controls| controls.sort_by(compare));
    }

    pub fn reverse(&self) {
        self.mutate(|controls| controls.reverse());
    }

    pub fn get(&self, index: usize) -> Option<C> {
        self.inner.controls.with(|controls| controls.get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.controls.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the children
    pub fn controls(&self) -> Vec<C> {
        self.inner.controls.get()
    }

    pub fn index_of(&self, control: &C) -> Option<usize> {
        self.inner
            .controls
            .with(|controls| controls.iter().position(|c| same(c, control)))
    }

    pub fn last_index_of(&self, control: &C) -> Option<usize> {
        self.inner
            .controls
            .with(|controls| controls.iter().rposition(|c| same(c, control)))
    }

    pub fn every(&self, mut predicate: impl FnMut(&C, usize) -> bool) -> bool {
        self.inner
            .controls
            .with(|controls| controls.iter().enumerate().all(|(i, c)| predicate(c, i)))
    }

    pub fn some(&self, mut predicate: impl FnMut(&C, usize) -> bool) -> bool {
        self.inner
            .controls
            .with(|controls| controls.iter().enumerate().any(|(i, c)| predicate(c, i)))
    }

    pub fn for_each(&self, mut f: impl FnMut(&C, usize)) {
        for (i, control) in self.controls().iter().enumerate() {
            f(control, i);
        }
    }

    pub fn map<R>(&self, mut f: impl FnMut(&C, usize) -> R) -> Vec<R> {
        self.controls()
            .iter()
            .enumerate()
            .map(|(i, c)| f(c, i))
            .collect()
    }

    pub fn filter(&self, mut predicate: impl FnMut(&C, usize) -> bool) -> Vec<C> {
        self.controls()
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| predicate(&c, i).then_some(c))
            .collect()
    }

    pub fn reduce<A>(&self, init: A, mut f: impl FnMut(A, &C, usize) -> A) -> A {
        self.controls()
            .iter()
            .enumerate()
            .fold(init, |acc, (i, c)| f(acc, c, i))
    }

    pub fn reduce_right<A>(&self, init: A, mut f: impl FnMut(A, &C, usize) -> A) -> A {
        self.controls()
            .iter()
            .enumerate()
            .rev()
            .fold(init, |acc, (i, c)| f(acc, c, i))
    }

    /// Children in `start..end`, clamped to the length
    pub fn slice(&self, start: usize, end: usize) -> Vec<C> {
        self.inner.controls.with(|controls| {
            let end = end.min(controls.len());
            let start = start.min(end);
            controls[start..end].to_vec()
        })
    }

    /// The children followed by `others`; the array is not modified
    pub fn concat(&self, others: impl IntoIterator<Item = C>) -> Vec<C> {
        let mut controls = self.controls();
        controls.extend(others);
        controls
    }

    /// Re-run the array's validators whenever anything `dependency` reads
    /// changes
    pub fn revalidate_when<F>(&self, dependency: F)
    where
        F: FnMut() + 'static,
    {
        composite::revalidate_when(self, dependency);
    }

    fn child_controls(&self) -> Vec<Control> {
        self.inner.controls.with(|controls| erase(controls))
    }
}

fn erase<C: ArrayItem>(controls: &[C]) -> Vec<Control> {
    controls.iter().cloned().map(Into::into).collect()
}

fn same<C: ArrayItem>(a: &C, b: &C) -> bool {
    std::ptr::eq(a.core(), b.core())
}

impl<C: ArrayItem> Composite for FormArray<C> {
    type Handle = Weak<ArrayInner<C>>;

    fn composite(&self) -> &CompositeState<Self> {
        &self.inner.state
    }

    fn downgrade(&self) -> Self::Handle {
        Rc::downgrade(&self.inner)
    }

    fn upgrade(handle: &Self::Handle) -> Option<Self> {
        handle.upgrade().map(|inner| FormArray { inner })
    }
}

impl<C: ArrayItem> AbstractControl for FormArray<C> {
    fn kind(&self) -> ControlKind {
        ControlKind::Array
    }

    fn core(&self) -> &ControlCore {
        &self.inner.state.core
    }

    fn processing(&self) -> bool {
        self.inner
            .controls
            .with(|controls| composite::processing(self.core(), controls))
    }

    fn invalid(&self) -> bool {
        self.inner
            .controls
            .with(|controls| composite::invalid(self.core(), controls))
    }

    fn dirty(&self) -> bool {
        self.some(|c, _| c.dirty())
    }

    fn touched(&self) -> bool {
        self.some(|c, _| c.touched())
    }

    fn focused(&self) -> bool {
        self.some(|c, _| c.focused())
    }

    fn set_dirty(&self, dirty: bool) {
        batch(|| self.for_each(|c, _| c.set_dirty(dirty)));
    }

    fn set_touched(&self, touched: bool) {
        batch(|| self.for_each(|c, _| c.set_touched(touched)));
    }

    fn children(&self) -> Vec<Control> {
        self.child_controls()
    }

    fn child(&self, segment: &str) -> Option<Control> {
        let index = segment.parse::<usize>().ok()?;
        self.get(index).map(Into::into)
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        let values = self
            .controls()
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_json().map_err(|err| err.nest(&i.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::Value::Array(values))
    }

    /// Apply values by index. Extra values are ignored; children past the
    /// end of `value` keep their state.
    fn apply_json(&self, value: &serde_json::Value) -> Result<()> {
        if self.core().is_disposed() {
            return Err(FormError::Disposed);
        }
        let serde_json::Value::Array(values) = value else {
            return Err(FormError::Conversion {
                pointer: String::new(),
                message: format!("expected an array, found {value}"),
            });
        };

        let controls = self.controls();
        batch(|| -> Result<()> {
            for (i, (control, value)) in controls.iter().zip(values).enumerate() {
                if control.to_json().ok().as_ref() == Some(value) {
                    continue;
                }
                control.apply_json(value).map_err(|err| err.nest(&i.to_string()))?;
            }
            Ok(())
        })
    }

    fn dispose(&self) {
        composite::dispose(&self.inner.state, &self.child_controls());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<C: ArrayItem> Validatable for FormArray<C> {
    fn execute_async_validation(&self, validator: &Validator<Self>) -> ValidationFuture {
        composite::execute(self, validator)
    }
}
