//! Named, fixed set of child controls

use super::base::{wait_for_idle, ControlCore};
use super::composite::{self, Composite, CompositeState};
use super::{
    AbstractControl, ArrayItem, Control, ControlKind, FormArray, FormControl, FormValue, GroupOptions,
};
use crate::error::{FormError, Result};
use crate::validator::{Validatable, ValidationFuture, Validator};
use indexmap::IndexMap;
use reform_core::reactive::batch;
use std::any::Any;
use std::rc::{Rc, Weak};

/// A control mapping field names to children, in insertion order.
///
/// ```ignore
/// let credentials = FormGroup::builder()
///     .control("login", FormControl::new(String::new(), LeafOptions::new().validator(required())))
///     .control("password", FormControl::new(String::new(), LeafOptions::new()))
///     .build();
/// ```
#[derive(Clone)]
pub struct FormGroup {
    inner: Rc<GroupInner>,
}

pub(crate) struct GroupInner {
    state: CompositeState<FormGroup>,
    controls: IndexMap<String, Control>,
    comparer: Option<JsonComparer>,
}

/// Decides whether an incoming JSON value equals a child's current one
pub type JsonComparer = Rc<dyn Fn(&serde_json::Value, &serde_json::Value) -> bool>;

impl std::fmt::Debug for FormGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormGroup")
            .field("controls", &self.inner.controls.keys().collect::<Vec<_>>())
            .field("core", &self.inner.state.core)
            .finish()
    }
}

impl FormGroup {
    /// Create a group over `controls`.
    ///
    /// Must run inside a `tokio::task::LocalSet`; the first validation pass
    /// is scheduled immediately.
    pub fn new(controls: IndexMap<String, Control>, options: GroupOptions) -> Self {
        Self::assemble(controls, options, None)
    }

    fn assemble(
        controls: IndexMap<String, Control>,
        options: GroupOptions,
        comparer: Option<JsonComparer>,
    ) -> Self {
        let core = ControlCore::new(ControlKind::Group, options.activate, options.additional_data);
        let group = FormGroup {
            inner: Rc::new(GroupInner {
                state: CompositeState::new(core, options.validators),
                controls,
                comparer,
            }),
        };
        let children: Vec<_> = group.inner.controls.values().cloned().collect();
        composite::initialize(&group, &children);
        group
    }

    pub fn builder() -> FormGroupBuilder {
        FormGroupBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Control> {
        self.inner.controls.get(name).cloned()
    }

    /// The leaf named `name`, if it holds a `T`
    pub fn leaf<T: FormValue>(&self, name: &str) -> Option<FormControl<T>> {
        self.inner.controls.get(name)?.as_leaf()
    }

    pub fn group(&self, name: &str) -> Option<FormGroup> {
        self.inner.controls.get(name)?.as_group()
    }

    pub fn array<C: ArrayItem>(&self, name: &str) -> Option<FormArray<C>> {
        self.inner.controls.get(name)?.as_array()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Control)> {
        self.inner.controls.iter().map(|(name, control)| (name.as_str(), control))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.controls.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.controls.is_empty()
    }

    /// Resolves once no validation pass is in flight in this group
    pub async fn wait(&self) {
        wait_for_idle(self.clone().into()).await;
    }

    /// Re-run the group's validators whenever anything `dependency` reads
    /// changes
    pub fn revalidate_when<F>(&self, dependency: F)
    where
        F: FnMut() + 'static,
    {
        composite::revalidate_when(self, dependency);
    }

    fn unchanged(&self, control: &Control, incoming: &serde_json::Value) -> bool {
        let Ok(current) = control.to_json() else {
            return false;
        };
        match &self.inner.comparer {
            Some(comparer) => comparer(&current, incoming),
            None => current == *incoming,
        }
    }

    fn child_controls(&self) -> Vec<Control> {
        self.inner.controls.values().cloned().collect()
    }
}

impl Composite for FormGroup {
    type Handle = Weak<GroupInner>;

    fn composite(&self) -> &CompositeState<Self> {
        &self.inner.state
    }

    fn downgrade(&self) -> Self::Handle {
        Rc::downgrade(&self.inner)
    }

    fn upgrade(handle: &Self::Handle) -> Option<Self> {
        handle.upgrade().map(|inner| FormGroup { inner })
    }
}

impl AbstractControl for FormGroup {
    fn kind(&self) -> ControlKind {
        ControlKind::Group
    }

    fn core(&self) -> &ControlCore {
        &self.inner.state.core
    }

    fn processing(&self) -> bool {
        composite::processing(self.core(), self.inner.controls.values())
    }

    fn invalid(&self) -> bool {
        composite::invalid(self.core(), self.inner.controls.values())
    }

    fn dirty(&self) -> bool {
        self.inner.controls.values().any(|c| c.dirty())
    }

    fn touched(&self) -> bool {
        self.inner.controls.values().any(|c| c.touched())
    }

    fn focused(&self) -> bool {
        self.inner.controls.values().any(|c| c.focused())
    }

    fn set_dirty(&self, dirty: bool) {
        batch(|| self.inner.controls.values().for_each(|c| c.set_dirty(dirty)));
    }

    fn set_touched(&self, touched: bool) {
        batch(|| self.inner.controls.values().for_each(|c| c.set_touched(touched)));
    }

    fn children(&self) -> Vec<Control> {
        self.child_controls()
    }

    fn child(&self, segment: &str) -> Option<Control> {
        self.get(segment)
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        let mut object = serde_json::Map::with_capacity(self.inner.controls.len());
        for (name, control) in &self.inner.controls {
            let value = control.to_json().map_err(|err| err.nest(name))?;
            object.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(object))
    }

    fn apply_json(&self, value: &serde_json::Value) -> Result<()> {
        if self.core().is_disposed() {
            return Err(FormError::Disposed);
        }
        let serde_json::Value::Object(object) = value else {
            return Err(FormError::Conversion {
                pointer: String::new(),
                message: format!("expected an object, found {value}"),
            });
        };

        batch(|| -> Result<()> {
            for (name, value) in object {
                let Some(control) = self.inner.controls.get(name) else {
                    tracing::trace!(field = %name, "skipping unknown field");
                    continue;
                };
                if self.unchanged(control, value) {
                    continue;
                }
                control.apply_json(value).map_err(|err| err.nest(name))?;
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

impl Validatable for FormGroup {
    fn execute_async_validation(&self, validator: &Validator<Self>) -> ValidationFuture {
        composite::execute(self, validator)
    }
}

/// Builder for [`FormGroup`]
#[derive(Default)]
pub struct FormGroupBuilder {
    controls: IndexMap<String, Control>,
    options: GroupOptions,
    comparer: Option<JsonComparer>,
}

impl FormGroupBuilder {
    /// Add a child; a later child with the same name replaces the earlier one
    pub fn control(mut self, name: impl Into<String>, control: impl Into<Control>) -> Self {
        self.controls.insert(name.into(), control.into());
        self
    }

    pub fn validator(mut self, validator: Validator<FormGroup>) -> Self {
        self.options = self.options.validator(validator);
        self
    }

    pub fn activate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.options = self.options.activate(predicate);
        self
    }

    pub fn additional_data(mut self, data: serde_json::Value) -> Self {
        self.options = self.options.additional_data(data);
        self
    }

    /// Replace JSON equality when `apply_json` decides which fields to skip
    pub fn comparer<F>(mut self, comparer: F) -> Self
    where
        F: Fn(&serde_json::Value, &serde_json::Value) -> bool + 'static,
    {
        self.comparer = Some(Rc::new(comparer));
        self
    }

    pub fn build(self) -> FormGroup {
        FormGroup::assemble(self.controls, self.options, self.comparer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LeafOptions;
    use crate::event::ValidationEvent;
    use crate::rules::{required, REQUIRED_KEY};
    use crate::tests::run_local;
    use reform_core::reactive::{untracked, Signal};
    use serde_json::json;
    use std::cell::Cell;

    fn credentials() -> FormGroup {
        FormGroup::builder()
            .control("login", FormControl::new(String::new(), LeafOptions::new().validator(required())))
            .control("remember", FormControl::new(false, LeafOptions::new()))
            .build()
    }

    #[test]
    fn test_aggregates_follow_children() {
        run_local(async {
            let group = credentials();
            assert!(group.processing());
            group.wait().await;

            assert!(group.invalid());
            assert!(group.errors().is_empty());
            assert!(group.pristine());

            let login = group.leaf::<String>("login").unwrap();
            assert!(login.has_error(REQUIRED_KEY));
            login.set_value("admin".into());
            login.set_focused(true);
            assert!(group.dirty());
            assert!(group.focused());
            group.wait().await;
            assert!(group.valid());
        });
    }

    #[test]
    fn test_child_change_notifies_and_revalidates() {
        run_local(async {
            let calls = Rc::new(Cell::new(0));
            let counter = calls.clone();
            let group = FormGroup::builder()
                .control("name", FormControl::new(String::new(), LeafOptions::new()))
                .validator(Validator::sync(move |_: &FormGroup| {
                    counter.set(counter.get() + 1);
                    Vec::new()
                }))
                .build();
            group.wait().await;
            assert_eq!(calls.get(), 1);

            let notified = Rc::new(Cell::new(0));
            let seen = notified.clone();
            group.on_change().subscribe(move || seen.set(seen.get() + 1));

            group.set_server_errors(vec!["rejected".into()]);
            group.leaf::<String>("name").unwrap().set_value("x".into());
            assert!(group.server_errors().is_empty());
            assert_eq!(notified.get(), 1);

            group.wait().await;
            assert_eq!(calls.get(), 2);
        });
    }

    #[test]
    fn test_group_validator_errors_are_own() {
        run_local(async {
            let group = FormGroup::builder()
                .control("password", FormControl::new("a".to_string(), LeafOptions::new()))
                .control("confirm", FormControl::new("b".to_string(), LeafOptions::new()))
                .validator(Validator::sync(|group: &FormGroup| {
                    let password = group.leaf::<String>("password").map(|c| c.value());
                    let confirm = group.leaf::<String>("confirm").map(|c| c.value());
                    if password == confirm {
                        Vec::new()
                    } else {
                        vec![ValidationEvent::error("Passwords differ").with_key("mismatch")]
                    }
                }))
                .build();
            group.wait().await;
            assert!(group.has_error("mismatch"));
            assert!(group.leaf::<String>("confirm").unwrap().valid());

            group.leaf::<String>("confirm").unwrap().set_value("a".into());
            group.wait().await;
            assert!(group.valid());
        });
    }

    #[test]
    fn test_inactive_group_is_valid() {
        run_local(async {
            let group = FormGroup::builder()
                .control("login", FormControl::new(String::new(), LeafOptions::new().validator(required())))
                .activate(|| false)
                .build();
            group.wait().await;
            assert!(group.valid());
            assert!(group.leaf::<String>("login").unwrap().invalid());
        });
    }

    #[test]
    fn test_broadcast_dirty_and_touched() {
        run_local(async {
            let group = credentials();
            group.set_touched(true);
            group.set_dirty(true);
            assert!(group.all_controls().iter().all(|c| c.touched() && c.dirty()));

            group.set_dirty(false);
            assert!(group.pristine());
        });
    }

    #[test]
    fn test_json_mapping() {
        run_local(async {
            let group = FormGroup::builder()
                .control("login", FormControl::new("root".to_string(), LeafOptions::new()))
                .control(
                    "address",
                    FormGroup::builder()
                        .control("zip", FormControl::new(10115u32, LeafOptions::new()))
                        .build(),
                )
                .build();
            assert_eq!(
                group.to_json().unwrap(),
                json!({ "login": "root", "address": { "zip": 10115 } })
            );

            group
                .apply_json(&json!({ "login": "admin", "unknown": 1, "address": { "zip": 10115 } }))
                .unwrap();
            assert_eq!(group.leaf::<String>("login").unwrap().value(), "admin");
            assert!(group.group("address").unwrap().pristine());

            let err = group.apply_json(&json!({ "address": { "zip": "ten" } })).unwrap_err();
            match err {
                FormError::Conversion { pointer, .. } => assert_eq!(pointer, "/address/zip"),
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(group.apply_json(&json!([1, 2])).is_err());
        });
    }

    #[test]
    fn test_comparer_skips_matching_fields() {
        run_local(async {
            let group = FormGroup::builder()
                .control("login", FormControl::new("admin".to_string(), LeafOptions::new()))
                .comparer(|current, incoming| match (current.as_str(), incoming.as_str()) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => current == incoming,
                })
                .build();

            group.apply_json(&json!({ "login": "ADMIN" })).unwrap();
            assert_eq!(group.leaf::<String>("login").unwrap().value(), "admin");
            assert!(group.pristine());

            group.apply_json(&json!({ "login": "root" })).unwrap();
            assert_eq!(group.leaf::<String>("login").unwrap().value(), "root");
        });
    }

    #[test]
    fn test_revalidate_when_reruns_group_validators() {
        run_local(async {
            let limit = Signal::new(1usize);
            let max = limit.clone();
            let group = FormGroup::builder()
                .control("a", FormControl::new(String::new(), LeafOptions::new()))
                .control("b", FormControl::new(String::new(), LeafOptions::new()))
                .validator(Validator::sync(move |group: &FormGroup| {
                    if group.len() > untracked(|| max.get()) {
                        vec![ValidationEvent::error("Too many fields").with_key("limit")]
                    } else {
                        Vec::new()
                    }
                }))
                .build();
            group.wait().await;
            assert!(group.has_error("limit"));

            let trigger = limit.clone();
            group.revalidate_when(move || {
                trigger.get();
            });
            limit.set(2);
            group.wait().await;
            assert!(group.valid());
        });
    }

    #[test]
    fn test_apply_json_on_disposed_group_fails() {
        run_local(async {
            let group = credentials();
            group.dispose();
            let err = group.apply_json(&json!({ "login": "admin" })).unwrap_err();
            assert_eq!(err, FormError::Disposed);
        });
    }

    #[test]
    fn test_dispose_cascades() {
        run_local(async {
            let group = credentials();
            let login = group.leaf::<String>("login").unwrap();
            group.dispose();

            assert!(group.is_disposed());
            assert!(login.is_disposed());
            assert!(login.on_change().is_empty());
        });
    }
}
