//! Built-in validation rules
//!
//! Every rule yields at most one [`ValidationEvent`] of type
//! [`Error`](crate::ValidationEventType::Error) carrying a stable key (see the
//! `*_KEY` constants). Use [`Validator::with_message`] or
//! [`Validator::with_event_type`] to adjust the event a rule raises.
//!
//! Text rules accept `String` and `Option<String>` values; an absent value
//! (`None`) passes every text rule except [`not_empty_or_spaces`].

use crate::control::{FormControl, FormValue};
use crate::event::ValidationEvent;
use crate::validator::{run_all, Validator};
use futures::FutureExt;
use regex::Regex;
use std::rc::Rc;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub const REQUIRED_KEY: &str = "required";
pub const NOT_EMPTY_OR_SPACES_KEY: &str = "notEmptyOrSpaces";
pub const PATTERN_KEY: &str = "pattern";
pub const MIN_LENGTH_KEY: &str = "minlength";
pub const MAX_LENGTH_KEY: &str = "maxlength";
pub const ABSOLUTE_LENGTH_KEY: &str = "absoluteLength";
pub const BIRTH_DAY_KEY: &str = "birthDay";
pub const ONLY_LETTER_KEY: &str = "onlyLetter";
pub const MIN_VALUE_KEY: &str = "minValue";
pub const MAX_VALUE_KEY: &str = "maxValue";
pub const NOT_ZERO_KEY: &str = "notZero";
pub const NOT_CONTAIN_SPACES_KEY: &str = "notContainSpaces";
pub const COMPARE_KEY: &str = "compare";
pub const IS_EQUAL_KEY: &str = "isEqual";

/// Youngest accepted age for [`birth_day`], in years
pub const MIN_AGE_YEARS: i32 = 18;
/// Oldest accepted age for [`birth_day`], in years
pub const MAX_AGE_YEARS: i32 = 118;

/// Values that can be "missing" for the purposes of [`required`]
pub trait EmptyValue {
    fn is_empty_value(&self) -> bool;
}

impl EmptyValue for String {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<T: EmptyValue> EmptyValue for Option<T> {
    fn is_empty_value(&self) -> bool {
        self.as_ref().map_or(true, EmptyValue::is_empty_value)
    }
}

impl<T> EmptyValue for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

macro_rules! never_empty {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EmptyValue for $ty {
                fn is_empty_value(&self) -> bool {
                    false
                }
            }
        )*
    };
}

never_empty!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Values text rules can inspect
pub trait TextValue {
    /// The text, or `None` when the value is absent
    fn as_text(&self) -> Option<&str>;
}

impl TextValue for String {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl TextValue for Option<String> {
    fn as_text(&self) -> Option<&str> {
        self.as_deref()
    }
}

fn failure(key: &'static str, message: &str) -> Vec<ValidationEvent> {
    vec![ValidationEvent::error(message).with_key(key)]
}

/// A rule that passes while `check` returns true
fn rule<T, F>(key: &'static str, message: impl Into<String>, check: F) -> Validator<FormControl<T>>
where
    T: FormValue,
    F: Fn(&T) -> bool + 'static,
{
    let message = message.into();
    Validator::sync(move |control: &FormControl<T>| {
        if control.with_value(|value| check(value)) {
            Vec::new()
        } else {
            failure(key, &message)
        }
    })
}

/// A text rule; absent values pass
fn text_rule<T, F>(key: &'static str, message: impl Into<String>, check: F) -> Validator<FormControl<T>>
where
    T: FormValue + TextValue,
    F: Fn(&str) -> bool + 'static,
{
    rule(key, message, move |value: &T| value.as_text().map_or(true, |text| check(text)))
}

/// Error when the value is missing (`None`, empty string, empty list)
pub fn required<T: FormValue + EmptyValue>() -> Validator<FormControl<T>> {
    rule(REQUIRED_KEY, "Field is required", |value: &T| !value.is_empty_value())
}

/// Error when the value is absent, empty or whitespace only
pub fn not_empty_or_spaces<T: FormValue + TextValue>() -> Validator<FormControl<T>> {
    rule(NOT_EMPTY_OR_SPACES_KEY, "Value is missing", |value: &T| {
        value.as_text().is_some_and(|text| !text.trim().is_empty())
    })
}

/// Error when the text does not match `regex`
pub fn pattern<T: FormValue + TextValue>(regex: Regex) -> Validator<FormControl<T>> {
    text_rule(PATTERN_KEY, "Contains invalid characters", move |text| regex.is_match(text))
}

/// Error when the text matches `regex`
pub fn invert_pattern<T: FormValue + TextValue>(regex: Regex) -> Validator<FormControl<T>> {
    text_rule(PATTERN_KEY, "Contains invalid characters", move |text| !regex.is_match(text))
}

/// Error when a non-empty text has fewer than `min` characters
pub fn min_length<T: FormValue + TextValue>(min: usize) -> Validator<FormControl<T>> {
    text_rule(MIN_LENGTH_KEY, format!("Minimum length is {min}"), move |text| {
        text.is_empty() || text.chars().count() >= min
    })
}

/// Error when the text has more than `max` characters
pub fn max_length<T: FormValue + TextValue>(max: usize) -> Validator<FormControl<T>> {
    text_rule(MAX_LENGTH_KEY, format!("Maximum length is {max}"), move |text| {
        text.chars().count() <= max
    })
}

/// Error when the text does not have exactly `length` characters
pub fn absolute_length<T: FormValue + TextValue>(length: usize) -> Validator<FormControl<T>> {
    text_rule(ABSOLUTE_LENGTH_KEY, format!("Length must be {length}"), move |text| {
        text.chars().count() == length
    })
}

/// Error when a non-empty text contains anything but letters and `-`
pub fn only_letter<T: FormValue + TextValue>() -> Validator<FormControl<T>> {
    text_rule(ONLY_LETTER_KEY, "Invalid format", |text| {
        text.chars().all(|c| c.is_alphabetic() || c == '-')
    })
}

/// Error when the text is exactly `"0"`
pub fn not_zero<T: FormValue + TextValue>() -> Validator<FormControl<T>> {
    text_rule(NOT_ZERO_KEY, "Must not be 0", |text| text != "0")
}

/// Error when the text contains whitespace
pub fn not_contain_spaces<T: FormValue + TextValue>() -> Validator<FormControl<T>> {
    text_rule(NOT_CONTAIN_SPACES_KEY, "Must not contain spaces", |text| {
        !text.chars().any(char::is_whitespace)
    })
}

/// Error when `expression` returns false for the value
pub fn compare<T, F>(expression: F) -> Validator<FormControl<T>>
where
    T: FormValue,
    F: Fn(&T) -> bool + 'static,
{
    rule(COMPARE_KEY, "Field is invalid", expression)
}

/// Error when the value differs from `expected`
pub fn is_equal<T: FormValue>(expected: T) -> Validator<FormControl<T>> {
    rule(IS_EQUAL_KEY, "Fields do not match", move |value: &T| *value == expected)
}

/// Error when the value is below `min`
pub fn min_value<T: FormValue + PartialOrd>(min: T) -> Validator<FormControl<T>> {
    min_value_by(move || min.clone())
}

/// Error when the value is below the bound returned by `min`.
///
/// The bound is read while validating, so a reactive bound re-validates the
/// control when it changes.
pub fn min_value_by<T, F>(min: F) -> Validator<FormControl<T>>
where
    T: FormValue + PartialOrd,
    F: Fn() -> T + 'static,
{
    rule(MIN_VALUE_KEY, "Value is too small", move |value: &T| *value >= min())
}

/// Error when the value is above `max`
pub fn max_value<T: FormValue + PartialOrd>(max: T) -> Validator<FormControl<T>> {
    max_value_by(move || max.clone())
}

/// Error when the value is above the bound returned by `max`
pub fn max_value_by<T, F>(max: F) -> Validator<FormControl<T>>
where
    T: FormValue + PartialOrd,
    F: Fn() -> T + 'static,
{
    rule(MAX_VALUE_KEY, "Value is too large", move |value: &T| *value <= max())
}

/// Error unless the text is a `dd.mm.yyyy` birth date of someone aged
/// between [`MIN_AGE_YEARS`] and [`MAX_AGE_YEARS`]
pub fn birth_day<T: FormValue + TextValue>() -> Validator<FormControl<T>> {
    Validator::sync(move |control: &FormControl<T>| {
        let today = OffsetDateTime::now_utc().date();
        let problem = control.with_value(|value| value.as_text().and_then(|text| check_birth_day(text, today)));
        match problem {
            Some(message) => failure(BIRTH_DAY_KEY, message),
            None => Vec::new(),
        }
    })
}

/// Check a `dd.mm.yyyy` birth date against `today`.
///
/// Returns the problem, or `None` when the date is acceptable.
pub fn check_birth_day(text: &str, today: Date) -> Option<&'static str> {
    let format = format_description!("[day].[month].[year]");
    let Ok(date) = Date::parse(text.trim(), &format) else {
        return Some("Invalid date");
    };
    let (Some(latest), Some(earliest)) = (
        years_before(today, MIN_AGE_YEARS),
        years_before(today, MAX_AGE_YEARS),
    ) else {
        return Some("Invalid date");
    };

    if date > latest {
        Some("Date is too late")
    } else if date < earliest {
        Some("Date is too early")
    } else {
        None
    }
}

/// Same calendar day `years` earlier; 29 February maps to the 28th
fn years_before(date: Date, years: i32) -> Option<Date> {
    let year = date.year() - years;
    Date::from_calendar_date(year, date.month(), date.day())
        .or_else(|_| Date::from_calendar_date(year, date.month(), date.day() - 1))
        .ok()
}

/// Run `validators` only when the text is present, non-empty and not `"0"`
pub fn skip_if_zero<T: FormValue + TextValue>(
    validators: Vec<Validator<FormControl<T>>>,
) -> Validator<FormControl<T>> {
    let validators: Rc<[Validator<FormControl<T>>]> = validators.into();
    Validator::new(move |control: &FormControl<T>| {
        let skip = control.with_value(|value| matches!(value.as_text(), None | Some("") | Some("0")));
        if skip {
            futures::future::ready(Ok(Vec::new())).boxed_local()
        } else {
            run_all(control, &validators)
        }
    })
}
