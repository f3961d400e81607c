//! reform
//!
//! Reactive form state with asynchronous validation.
//!
//! A form is a tree of controls: [`FormControl`] leaves, named [`FormGroup`]s
//! and ordered [`FormArray`]s. Each control runs its own validators whenever
//! its value or anything the validators read changes; overlapping requests
//! are coalesced so only the most recent pass is published. Dirty, touched,
//! focused, processing and invalid state aggregates bottom-up.
//!
//! Controls are single-threaded. Validation passes are spawned with
//! `tokio::task::spawn_local`, so controls must be created and mutated inside
//! a [`tokio::task::LocalSet`].
//!
//! # Example
//!
//! ```ignore
//! use reform::prelude::*;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let login = FormControl::new(String::new(), LeafOptions::new().validator(rules::required()));
//!     let form = FormGroup::builder().control("login", login.clone()).build();
//!
//!     form.wait().await;
//!     assert!(form.invalid());
//!
//!     login.set_value("admin".into());
//!     form.wait().await;
//!     assert!(form.valid());
//! }).await;
//! ```

pub mod control;
pub mod error;
pub mod event;
pub mod rules;
pub mod server;
pub mod validator;

#[cfg(test)]
mod tests;

pub use control::{
    AbstractControl, ArrayItem, ArrayOptions, Control, ControlCore, ControlKind, ControlOptions,
    FormArray, FormControl, FormGroup, FormGroupBuilder, FormValue, GroupOptions, JsonComparer, LeafOptions,
    SetterPolicy, ValueSource,
};
pub use error::{FormError, Result};
pub use event::{combine_errors, EventLists, ValidationEvent, ValidationEventType};
pub use server::ServerErrors;
pub use validator::{activate_validation, sequential_check, Validatable, ValidationFuture, Validator};

// Re-export the reactive substrate so callers can feed getters and predicates
pub use reform_core::reactive::{batch, untracked, Reaction, Signal};

/// Prelude module - import everything commonly needed
pub mod prelude {
    pub use crate::control::{
        AbstractControl, ArrayOptions, Control, ControlKind, FormArray, FormControl, FormGroup,
        GroupOptions, LeafOptions, SetterPolicy, ValueSource,
    };
    pub use crate::error::{FormError, Result};
    pub use crate::event::{ValidationEvent, ValidationEventType};
    pub use crate::rules;
    pub use crate::server::ServerErrors;
    pub use crate::validator::{activate_validation, sequential_check, Validator};

    // Reactive primitives
    pub use reform_core::reactive::{batch, observe, reaction, untracked, when, Signal};
}
