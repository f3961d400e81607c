//! The control tree
//!
//! A form is a tree of controls: [`FormControl`] leaves holding one value,
//! [`FormGroup`]s mapping field names to children and [`FormArray`]s holding an
//! ordered list of children of one type. Every control implements
//! [`AbstractControl`]; [`Control`] is the type-erased handle used wherever
//! children of mixed kinds are stored.
//!
//! State flows bottom-up: a leaf notifies its parent through
//! [`AbstractControl::on_change`], the parent re-runs its own validators and
//! notifies its parent in turn. Aggregate flags (`processing`, `invalid`,
//! `dirty`, `touched`, `focused`) are computed from live child state on every
//! read.

mod array;
pub(crate) mod base;
mod composite;
mod group;
mod leaf;

pub use self::array::FormArray;
pub use self::base::ControlCore;
pub use self::group::{FormGroup, FormGroupBuilder, JsonComparer};
pub use self::leaf::{FormControl, ValueSource};

use crate::error::{FormError, Result};
use crate::event::{ValidationEvent, ValidationEventType};
use crate::server::{pointer_segments, ServerErrors};
use crate::validator::Validator;
use reform_core::Notifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::rc::Rc;

/// The closed set of control variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    Leaf,
    Group,
    Array,
}

/// Values a [`FormControl`] can hold
pub trait FormValue: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> FormValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

/// Controls a [`FormArray`] can hold
pub trait ArrayItem: AbstractControl + Clone + Into<Control> + 'static {}

impl<T> ArrayItem for T where T: AbstractControl + Clone + Into<Control> + 'static {}

/// Capabilities shared by every control kind.
///
/// Reads of reactive state (`valid`, `errors`, `processing`, ...) are tracked,
/// so they can drive reactions, activation predicates and validators.
pub trait AbstractControl {
    fn kind(&self) -> ControlKind;

    /// Shared state: activation, event lists, server errors, notifier
    fn core(&self) -> &ControlCore;

    /// A validation pass is in flight here (or, for composites, below)
    fn processing(&self) -> bool;

    fn invalid(&self) -> bool;

    fn dirty(&self) -> bool;

    fn touched(&self) -> bool;

    fn focused(&self) -> bool;

    fn set_dirty(&self, dirty: bool);

    fn set_touched(&self, touched: bool);

    /// Direct children in traversal order
    fn children(&self) -> Vec<Control>;

    /// The direct child addressed by one JSON pointer segment
    fn child(&self, _segment: &str) -> Option<Control> {
        None
    }

    /// The current value of this subtree as JSON
    fn to_json(&self) -> Result<serde_json::Value>;

    /// Push a JSON value down into this subtree.
    ///
    /// Equal values are skipped; unknown group keys are ignored.
    fn apply_json(&self, value: &serde_json::Value) -> Result<()>;

    /// Release every subscription. Composites dispose their children too.
    fn dispose(&self);

    fn as_any(&self) -> &dyn Any;

    fn valid(&self) -> bool {
        !self.invalid()
    }

    fn pristine(&self) -> bool {
        !self.dirty()
    }

    fn untouched(&self) -> bool {
        !self.touched()
    }

    /// Validation is enforced
    fn active(&self) -> bool {
        self.core().active()
    }

    /// Validation is switched off; the control is always valid
    fn disabled(&self) -> bool {
        !self.active()
    }

    fn errors(&self) -> Rc<[ValidationEvent]> {
        self.core().errors()
    }

    fn warnings(&self) -> Rc<[ValidationEvent]> {
        self.core().warnings()
    }

    fn information_messages(&self) -> Rc<[ValidationEvent]> {
        self.core().information_messages()
    }

    fn successes(&self) -> Rc<[ValidationEvent]> {
        self.core().successes()
    }

    /// Own validator errors or server errors are present
    fn has_errors(&self) -> bool {
        !self.errors().is_empty() || !self.server_errors().is_empty()
    }

    /// An own validator error with `key` is present
    fn has_error(&self, key: &str) -> bool {
        self.errors()
            .iter()
            .any(|event| event.key.as_deref() == Some(key))
    }

    fn has_warnings(&self) -> bool {
        !self.warnings().is_empty()
    }

    fn has_information_messages(&self) -> bool {
        !self.information_messages().is_empty()
    }

    fn has_successes(&self) -> bool {
        !self.successes().is_empty()
    }

    /// The most severe category with content
    fn max_event_level(&self) -> ValidationEventType {
        if self.has_errors() {
            ValidationEventType::Error
        } else if self.has_warnings() {
            ValidationEventType::Warning
        } else if self.has_information_messages() {
            ValidationEventType::Info
        } else {
            ValidationEventType::Success
        }
    }

    fn server_errors(&self) -> Rc<[String]> {
        self.core().server_errors()
    }

    fn set_server_errors(&self, errors: Vec<String>) {
        self.core().set_server_errors(errors);
    }

    /// The fault of the last failed validation pass, if the last settled
    /// pass failed
    fn validation_fault(&self) -> Option<FormError> {
        self.core().fault()
    }

    fn additional_data(&self) -> Option<serde_json::Value> {
        self.core().additional_data()
    }

    fn set_additional_data(&self, data: Option<serde_json::Value>) {
        self.core().set_additional_data(data);
    }

    /// Fired on every value or state-affecting change
    fn on_change(&self) -> &Notifier {
        self.core().on_change()
    }

    fn is_disposed(&self) -> bool {
        self.core().is_disposed()
    }

    /// Every leaf below this control, in traversal order
    fn all_controls(&self) -> Vec<Control> {
        let mut leaves = Vec::new();
        for child in self.children() {
            match child.kind() {
                ControlKind::Leaf => leaves.push(child),
                ControlKind::Group | ControlKind::Array => leaves.extend(child.all_controls()),
            }
        }
        leaves
    }

    /// Resolve a JSON pointer such as `/items/0` to a descendant.
    ///
    /// The empty pointer addresses this control itself and yields `Ok(None)`.
    fn find(&self, pointer: &str) -> Result<Option<Control>> {
        let segments = pointer_segments(pointer)?;
        let Some((first, rest)) = segments.split_first() else {
            return Ok(None);
        };
        let mut current = match self.child(first) {
            Some(child) => child,
            None => return Err(FormError::UnknownPath(pointer.to_string())),
        };
        for segment in rest {
            current = current
                .child(segment)
                .ok_or_else(|| FormError::UnknownPath(pointer.to_string()))?;
        }
        Ok(Some(current))
    }

    /// Distribute server errors through this subtree.
    ///
    /// Form-level messages and the empty pointer go to this control. Returns
    /// `"<pointer>: <message>"` for every message whose pointer addresses no
    /// control.
    fn apply_server_errors(&self, errors: &ServerErrors) -> Vec<String> {
        let mut unmatched = Vec::new();
        let mut own = errors.form.clone();

        for (pointer, messages) in &errors.fields {
            match self.find(pointer) {
                Ok(Some(control)) => control.set_server_errors(messages.clone()),
                Ok(None) => own.extend(messages.iter().cloned()),
                Err(_) => unmatched.extend(messages.iter().map(|m| format!("{pointer}: {m}"))),
            }
        }

        if !own.is_empty() {
            self.set_server_errors(own);
        }
        unmatched
    }
}

/// Type-erased, cheaply clonable handle to any control
#[derive(Clone)]
pub struct Control {
    handle: Rc<dyn AbstractControl>,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("kind", &self.handle.kind())
            .finish_non_exhaustive()
    }
}

impl Control {
    pub fn new<C: AbstractControl + 'static>(control: C) -> Self {
        Self {
            handle: Rc::new(control),
        }
    }

    /// Downcast to a leaf holding `T`
    pub fn as_leaf<T: FormValue>(&self) -> Option<FormControl<T>> {
        self.handle.as_any().downcast_ref::<FormControl<T>>().cloned()
    }

    pub fn as_group(&self) -> Option<FormGroup> {
        self.handle.as_any().downcast_ref::<FormGroup>().cloned()
    }

    /// Downcast to an array holding `C`
    pub fn as_array<C: ArrayItem>(&self) -> Option<FormArray<C>> {
        self.handle.as_any().downcast_ref::<FormArray<C>>().cloned()
    }

    /// Resolves once no validation pass is in flight in this subtree
    pub async fn wait(&self) {
        self::base::wait_for_idle(self.clone()).await;
    }

    /// Both handles point at the same control
    pub fn ptr_eq(&self, other: &Control) -> bool {
        std::ptr::eq(self.core(), other.core())
    }
}

impl AbstractControl for Control {
    fn kind(&self) -> ControlKind {
        self.handle.kind()
    }

    fn core(&self) -> &ControlCore {
        self.handle.core()
    }

    fn processing(&self) -> bool {
        self.handle.processing()
    }

    fn invalid(&self) -> bool {
        self.handle.invalid()
    }

    fn dirty(&self) -> bool {
        self.handle.dirty()
    }

    fn touched(&self) -> bool {
        self.handle.touched()
    }

    fn focused(&self) -> bool {
        self.handle.focused()
    }

    fn set_dirty(&self, dirty: bool) {
        self.handle.set_dirty(dirty);
    }

    fn set_touched(&self, touched: bool) {
        self.handle.set_touched(touched);
    }

    fn children(&self) -> Vec<Control> {
        self.handle.children()
    }

    fn child(&self, segment: &str) -> Option<Control> {
        self.handle.child(segment)
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        self.handle.to_json()
    }

    fn apply_json(&self, value: &serde_json::Value) -> Result<()> {
        self.handle.apply_json(value)
    }

    fn dispose(&self) {
        self.handle.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self.handle.as_any()
    }
}

impl<T: FormValue> From<FormControl<T>> for Control {
    fn from(control: FormControl<T>) -> Self {
        Control::new(control)
    }
}

impl From<FormGroup> for Control {
    fn from(control: FormGroup) -> Self {
        Control::new(control)
    }
}

impl<C: ArrayItem> From<FormArray<C>> for Control {
    fn from(control: FormArray<C>) -> Self {
        Control::new(control)
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// When a leaf pushes its valid value to the `on_change_valid_value` sink.
///
/// Outside of these cases the sink is called after every settled pass that
/// follows a user edit and leaves the leaf without errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetterPolicy {
    /// Call the sink after the pass that runs at construction
    pub call_on_initialize: bool,
    /// Call the sink when a value getter produces a new value
    pub call_on_reinitialize: bool,
    /// Call the sink even while the leaf is inactive
    pub call_when_inactive: bool,
}

/// Options shared by every control kind
pub struct ControlOptions<C> {
    pub(crate) validators: Vec<Validator<C>>,
    pub(crate) activate: Option<Rc<dyn Fn() -> bool>>,
    pub(crate) additional_data: Option<serde_json::Value>,
}

impl<C> Default for ControlOptions<C> {
    fn default() -> Self {
        Self {
            validators: Vec::new(),
            activate: None,
            additional_data: None,
        }
    }
}

impl<C: 'static> ControlOptions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(mut self, validator: Validator<C>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn validators(mut self, validators: impl IntoIterator<Item = Validator<C>>) -> Self {
        self.validators.extend(validators);
        self
    }

    /// Enable validation only while `predicate` holds; re-evaluated reactively
    pub fn activate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.activate = Some(Rc::new(predicate));
        self
    }

    pub fn additional_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

pub type GroupOptions = ControlOptions<FormGroup>;

pub type ArrayOptions<C> = ControlOptions<FormArray<C>>;

/// Options for a [`FormControl`]
pub struct LeafOptions<T: FormValue> {
    pub(crate) base: ControlOptions<FormControl<T>>,
    pub(crate) on_change_value: Option<Rc<dyn Fn(&T)>>,
    pub(crate) on_change_valid_value: Option<Rc<dyn Fn(&T)>>,
    pub(crate) policy: SetterPolicy,
}

impl<T: FormValue> Default for LeafOptions<T> {
    fn default() -> Self {
        Self {
            base: ControlOptions::default(),
            on_change_value: None,
            on_change_valid_value: None,
            policy: SetterPolicy::default(),
        }
    }
}

impl<T: FormValue> LeafOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(mut self, validator: Validator<FormControl<T>>) -> Self {
        self.base = self.base.validator(validator);
        self
    }

    pub fn validators(
        mut self,
        validators: impl IntoIterator<Item = Validator<FormControl<T>>>,
    ) -> Self {
        self.base = self.base.validators(validators);
        self
    }

    pub fn activate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.base = self.base.activate(predicate);
        self
    }

    pub fn additional_data(mut self, data: serde_json::Value) -> Self {
        self.base = self.base.additional_data(data);
        self
    }

    /// Called on every user edit, before validation
    pub fn on_change_value<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        self.on_change_value = Some(Rc::new(callback));
        self
    }

    /// Receives the value after a pass settles without errors, subject to
    /// the [`SetterPolicy`]
    pub fn on_change_valid_value<F>(mut self, sink: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        self.on_change_valid_value = Some(Rc::new(sink));
        self
    }

    pub fn policy(mut self, policy: SetterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn call_on_initialize(mut self, call: bool) -> Self {
        self.policy.call_on_initialize = call;
        self
    }

    pub fn call_on_reinitialize(mut self, call: bool) -> Self {
        self.policy.call_on_reinitialize = call;
        self
    }

    pub fn call_when_inactive(mut self, call: bool) -> Self {
        self.policy.call_when_inactive = call;
        self
    }
}
