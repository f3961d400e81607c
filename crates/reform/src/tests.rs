//! End-to-end scenarios for the form engine
//!
//! Every scenario runs on a current-thread runtime inside a `LocalSet`, the
//! environment controls require for their validation passes.

use crate::prelude::*;
use crate::rules::{max_value, min_value, pattern, required, MAX_VALUE_KEY, MIN_VALUE_KEY, PATTERN_KEY, REQUIRED_KEY};
use regex::Regex;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use tokio::sync::Notify;

/// Drive `future` to completion on a fresh single-threaded runtime
pub(crate) fn run_local<F: Future>(future: F) -> F::Output {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build test runtime");
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

/// Records every value handed to a valid-value sink
fn recording_sink<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    (calls, move |value: &T| log.borrow_mut().push(value.clone()))
}

/// Let spawned validation tasks run until `done` holds
async fn yield_until(mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// SETTLE & COALESCING
// =============================================================================

#[test]
fn test_settle_reflects_latest_value() {
    run_local(async {
        let leaf = FormControl::new(
            String::new(),
            LeafOptions::new().validator(required()).validator(Validator::sync(
                |c: &FormControl<String>| vec![ValidationEvent::info(c.value())],
            )),
        );
        leaf.wait().await;
        assert!(!leaf.processing());
        assert!(leaf.has_error(REQUIRED_KEY));

        leaf.set_value("abc".into());
        leaf.wait().await;
        assert!(!leaf.processing());
        assert!(leaf.errors().is_empty());
        assert_eq!(leaf.information_messages()[0].message, "abc");

        // Waiting again without changes is a no-op
        leaf.wait().await;
        assert_eq!(leaf.information_messages().len(), 1);
    });
}

#[test]
fn test_rapid_mutations_coalesce_into_one_pass() {
    run_local(async {
        let seen: Rc<RefCell<Vec<String>>> = Rc::default();
        let log = seen.clone();
        let leaf = FormControl::new(
            String::new(),
            LeafOptions::new().validator(Validator::sync(move |c: &FormControl<String>| {
                log.borrow_mut().push(c.value());
                Vec::new()
            })),
        );

        for value in ["a", "ab", "abc", "abcd", "abcde"] {
            leaf.set_value(value.into());
        }
        leaf.wait().await;

        assert_eq!(*seen.borrow(), vec!["abcde".to_string()]);
    });
}

#[test]
fn test_mutations_during_pass_discard_stale_result() {
    run_local(async {
        let gate = Rc::new(Notify::new());
        let seen: Rc<RefCell<Vec<String>>> = Rc::default();
        let (sink_calls, sink) = recording_sink::<String>();

        let (log, pass_gate) = (seen.clone(), gate.clone());
        let leaf = FormControl::new(
            String::new(),
            LeafOptions::new()
                .validator(Validator::new(move |c: &FormControl<String>| {
                    let value = c.value();
                    log.borrow_mut().push(value.clone());
                    let gate = pass_gate.clone();
                    async move {
                        gate.notified().await;
                        Ok(vec![ValidationEvent::info(value)])
                    }
                }))
                .on_change_valid_value(sink),
        );

        let started = seen.clone();
        yield_until(move || !started.borrow().is_empty()).await;
        leaf.set_value("a".into());
        leaf.set_value("ab".into());
        assert!(leaf.processing());

        gate.notify_one();
        gate.notify_one();
        leaf.wait().await;

        assert_eq!(*seen.borrow(), vec![String::new(), "ab".to_string()]);
        assert_eq!(leaf.information_messages().len(), 1);
        assert_eq!(leaf.information_messages()[0].message, "ab");
        // Edits coalesced into the construction pass keep its sink policy
        assert!(sink_calls.borrow().is_empty());
    });
}

#[test]
fn test_disposed_control_discards_pass_in_flight() {
    run_local(async {
        let gate = Rc::new(Notify::new());
        let started = Rc::new(Cell::new(false));
        let (flag, pass_gate) = (started.clone(), gate.clone());
        let leaf = FormControl::new(
            String::new(),
            LeafOptions::new().validator(Validator::new(move |_: &FormControl<String>| {
                flag.set(true);
                let gate = pass_gate.clone();
                async move {
                    gate.notified().await;
                    Ok(vec![ValidationEvent::error("late")])
                }
            })),
        );

        let probe = started.clone();
        yield_until(move || probe.get()).await;
        leaf.dispose();
        gate.notify_one();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(leaf.errors().is_empty());
        assert!(!leaf.processing());
        leaf.wait().await;
    });
}

// =============================================================================
// VALID-VALUE SINK
// =============================================================================

#[test]
fn test_sink_suppressed_on_initialize_by_default() {
    run_local(async {
        let (calls, sink) = recording_sink::<String>();
        let leaf = FormControl::new(
            "test".to_string(),
            LeafOptions::new().validator(required()).on_change_valid_value(sink),
        );
        leaf.wait().await;
        assert!(calls.borrow().is_empty());

        leaf.set_value("qwerty".into());
        leaf.wait().await;
        assert_eq!(*calls.borrow(), vec!["qwerty".to_string()]);
    });
}

#[test]
fn test_reactive_source_adoption() {
    run_local(async {
        let model = Signal::new("test".to_string());
        let (calls, sink) = recording_sink::<String>();
        let source = model.clone();
        let leaf = FormControl::with_getter(
            move || source.get(),
            LeafOptions::new().validator(required()).on_change_valid_value(sink),
        );
        leaf.wait().await;
        assert_eq!(leaf.value(), "test");

        model.set("qwerty".into());
        leaf.wait().await;
        assert_eq!(leaf.value(), "qwerty");
        assert!(leaf.pristine());
        assert!(calls.borrow().is_empty());
    });
}

#[test]
fn test_activation_does_not_call_sink_during_construction() {
    run_local(async {
        let mode = FormControl::new("on".to_string(), LeafOptions::new());
        let (calls, sink) = recording_sink::<String>();
        let gate = mode.clone();
        let dependent = FormControl::new(
            "value".to_string(),
            LeafOptions::new()
                .validator(required())
                .activate(move || gate.value() == "on")
                .on_change_valid_value(sink),
        );
        dependent.wait().await;

        assert!(dependent.active());
        assert!(calls.borrow().is_empty());
    });
}

#[test]
fn test_activation_flip_before_first_settle_skips_sink() {
    run_local(async {
        let mode = FormControl::new("off".to_string(), LeafOptions::new());
        let (calls, sink) = recording_sink::<String>();
        let gate = mode.clone();
        let dependent = FormControl::new(
            "bar".to_string(),
            LeafOptions::new()
                .validator(required())
                .activate(move || gate.value() == "on")
                .on_change_valid_value(sink),
        );
        mode.set_value("on".into());
        dependent.wait().await;

        assert!(dependent.active());
        assert!(dependent.valid());
        assert!(calls.borrow().is_empty());
    });
}

#[test]
fn test_activation_flip_calls_sink_once() {
    run_local(async {
        let mode = FormControl::new("off".to_string(), LeafOptions::new());
        let (calls, sink) = recording_sink::<String>();
        let changes = Rc::new(Cell::new(0));

        let gate = mode.clone();
        let dependent = FormControl::new(
            "value".to_string(),
            LeafOptions::new()
                .validator(required())
                .activate(move || gate.value() == "on")
                .on_change_valid_value(sink),
        );
        let counter = changes.clone();
        dependent.on_change().subscribe(move || counter.set(counter.get() + 1));
        dependent.wait().await;
        assert!(dependent.disabled());
        assert!(calls.borrow().is_empty());

        mode.set_value("on".into());
        dependent.wait().await;

        assert!(dependent.active());
        assert_eq!(changes.get(), 1);
        assert_eq!(*calls.borrow(), vec!["value".to_string()]);
    });
}

// =============================================================================
// COMPOSITES
// =============================================================================

#[test]
fn test_range_validation_in_group() {
    run_local(async {
        let form = FormGroup::builder()
            .control(
                "count",
                FormControl::new(0i32, LeafOptions::new().validator(min_value(1)).validator(max_value(5))),
            )
            .build();
        form.wait().await;
        assert!(!form.valid());

        let count = form.leaf::<i32>("count").unwrap();
        assert!(count.has_error(MIN_VALUE_KEY));

        count.set_value(3);
        form.wait().await;
        assert!(form.valid());

        count.set_value(9);
        form.wait().await;
        assert!(count.has_error(MAX_VALUE_KEY));
        assert!(form.invalid());
    });
}

#[test]
fn test_array_aggregate_validity() {
    run_local(async {
        let items = vec![
            FormControl::new(String::new(), LeafOptions::new()),
            FormControl::new(String::new(), LeafOptions::new()),
        ];
        let array = FormArray::new(
            items,
            ArrayOptions::new().validator(Validator::sync(|array: &FormArray<FormControl<String>>| {
                if array.some(|item, _| !item.value().is_empty()) {
                    vec![ValidationEvent::error("Items must stay empty")]
                } else {
                    Vec::new()
                }
            })),
        );
        let form = FormGroup::builder().control("items", array.clone()).build();
        form.wait().await;
        assert!(form.valid());

        array.get(0).unwrap().set_value("test".into());
        form.wait().await;
        assert!(!form.valid());
        assert!(array.has_errors());
    });
}

#[test]
fn test_sequential_chain_short_circuits() {
    run_local(async {
        let pattern_calls = Rc::new(Cell::new(0));
        let counter = pattern_calls.clone();
        let digits = pattern(Regex::new(r"^\d+$").unwrap());
        let counted_pattern = Validator::new(move |c: &FormControl<String>| {
            counter.set(counter.get() + 1);
            digits.call(c)
        });

        let leaf = FormControl::new(
            String::new(),
            LeafOptions::new().validator(sequential_check(vec![required(), counted_pattern])),
        );
        leaf.wait().await;

        let keys: Vec<_> = leaf.errors().iter().filter_map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![REQUIRED_KEY.to_string()]);
        assert_eq!(pattern_calls.get(), 0);

        leaf.set_value("abc".into());
        leaf.wait().await;
        assert!(leaf.has_error(PATTERN_KEY));
        assert_eq!(pattern_calls.get(), 1);
    });
}

// =============================================================================
// SERVER ERRORS & JSON
// =============================================================================

fn signup_form() -> FormGroup {
    FormGroup::builder()
        .control("login", FormControl::new("admin".to_string(), LeafOptions::new()))
        .control(
            "address",
            FormGroup::builder()
                .control("city", FormControl::new("Berlin".to_string(), LeafOptions::new()))
                .build(),
        )
        .control(
            "phones",
            FormArray::new(
                vec![FormControl::new("+49".to_string(), LeafOptions::new())],
                ArrayOptions::new(),
            ),
        )
        .build()
}

#[test]
fn test_server_errors_distributed_by_pointer() {
    run_local(async {
        let form = signup_form();
        form.wait().await;

        let payload = ServerErrors::from_json(&json!({
            "form": ["Signup rejected"],
            "fields": {
                "/login": ["Login is taken"],
                "/address/city": ["Unknown city"],
                "/phones/0": ["Invalid number"],
                "/nickname": ["Unexpected field"]
            }
        }))
        .unwrap();
        let unmatched = form.apply_server_errors(&payload);

        assert_eq!(unmatched, vec!["/nickname: Unexpected field".to_string()]);
        assert_eq!(&*form.server_errors(), ["Signup rejected".to_string()]);
        let login = form.leaf::<String>("login").unwrap();
        assert_eq!(&*login.server_errors(), ["Login is taken".to_string()]);
        let city = form.find("/address/city").unwrap().unwrap();
        assert_eq!(city.server_errors().len(), 1);
        let phone = form.array::<FormControl<String>>("phones").unwrap().get(0).unwrap();
        assert!(phone.invalid());
        assert!(form.invalid());

        // A local edit clears the edited leaf and the form-level messages
        login.set_value("root".into());
        assert!(login.server_errors().is_empty());
        assert!(form.server_errors().is_empty());
        assert_eq!(city.server_errors().len(), 1);
    });
}

#[test]
fn test_json_round_trip_keeps_equal_values_pristine() {
    run_local(async {
        let form = signup_form();
        let snapshot = form.to_json().unwrap();
        assert_eq!(
            snapshot,
            json!({ "login": "admin", "address": { "city": "Berlin" }, "phones": ["+49"] })
        );

        form.apply_json(&snapshot).unwrap();
        assert!(form.pristine());

        form.apply_json(&json!({ "address": { "city": "Hamburg" } })).unwrap();
        assert!(form.dirty());
        assert_eq!(form.find("/address/city").unwrap().unwrap().to_json().unwrap(), json!("Hamburg"));
    });
}

#[test]
fn test_controls_are_freed_after_drop() {
    run_local(async {
        let form = signup_form();
        form.wait().await;
        let login = form.leaf::<String>("login").unwrap();
        form.dispose();
        drop(form);

        assert!(login.is_disposed());
        login.set_value("ignored".into());
        assert!(!login.processing());
    });
}
