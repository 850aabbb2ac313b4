//! Per-operation decision rules.
//!
//! Each rule sees the field as it was read under WATCH and returns the write to
//! stage plus the value the caller gets back if the commit succeeds. The
//! `current` argument distinguishes an absent field (`None`) from a field mapped
//! to null (`Some(None)`).
//!
//! The `*_if_absent`, `*_if_present` and `merge` rules treat a null mapping as
//! absent, like `java.util.Map`; `compute` deletes it when the remapping yields
//! nothing.

use super::Value;

/// Outcome of a decision rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// No write; return `T` immediately.
    Keep(T),
    /// Set the field to the value, then return `T`.
    Write(Value, T),
    /// Delete the field, then return `T`.
    Delete(T),
}

impl<T> Step<T> {
    pub fn result(&self) -> &T {
        match self {
            Step::Keep(r) | Step::Write(_, r) | Step::Delete(r) => r,
        }
    }
}

/// Returns the previous mapping, `None` if there was none.
pub fn put(current: Option<Value>, value: Value) -> Step<Option<Value>> {
    Step::Write(value, current)
}

pub fn put_if_absent(current: Option<Value>, value: Value) -> Step<Option<Value>> {
    match current {
        Some(Some(old)) => Step::Keep(Some(Some(old))),
        other => Step::Write(value, other),
    }
}

pub fn remove(current: Option<Value>) -> Step<Option<Value>> {
    match current {
        None => Step::Keep(None),
        Some(old) => Step::Delete(Some(old)),
    }
}

pub fn remove_if(current: Option<Value>, expected: &Value) -> Step<bool> {
    match current {
        Some(old) if old == *expected => Step::Delete(true),
        _ => Step::Keep(false),
    }
}

pub fn replace(current: Option<Value>, value: Value) -> Step<Option<Value>> {
    match current {
        None => Step::Keep(None),
        Some(old) => Step::Write(value, Some(old)),
    }
}

pub fn replace_if(current: Option<Value>, expected: &Value, value: Value) -> Step<bool> {
    match current {
        Some(old) if old == *expected => Step::Write(value, true),
        _ => Step::Keep(false),
    }
}

/// `mapping` is only called when the field is absent or null.
pub fn compute_if_absent<F>(current: Option<Value>, mapping: F) -> Step<Value>
where
    F: FnOnce() -> Value,
{
    match current {
        Some(Some(old)) => Step::Keep(Some(old)),
        _ => match mapping() {
            Some(new) => Step::Write(Some(new.clone()), Some(new)),
            None => Step::Keep(None),
        },
    }
}

pub fn compute_if_present<F>(current: Option<Value>, remapping: F) -> Step<Value>
where
    F: FnOnce(&str) -> Value,
{
    match current {
        Some(Some(old)) => match remapping(&old) {
            Some(new) => Step::Write(Some(new.clone()), Some(new)),
            None => Step::Delete(None),
        },
        _ => Step::Keep(None),
    }
}

pub fn compute<F>(current: Option<Value>, remapping: F) -> Step<Value>
where
    F: FnOnce(Option<&str>) -> Value,
{
    let existed = current.is_some();
    let old = current.flatten();
    match (remapping(old.as_deref()), existed) {
        (Some(new), _) => Step::Write(Some(new.clone()), Some(new)),
        (None, true) => Step::Delete(None),
        (None, false) => Step::Keep(None),
    }
}

pub fn merge<F>(current: Option<Value>, value: &str, remapping: F) -> Step<Value>
where
    F: FnOnce(&str, &str) -> Value,
{
    match current.flatten() {
        None => Step::Write(Some(value.to_string()), Some(value.to_string())),
        Some(old) => match remapping(&old, value) {
            Some(new) => Step::Write(Some(new.clone()), Some(new)),
            None => Step::Delete(None),
        },
    }
}

/// Rewrites any existing mapping, null included, with `remapping`'s result.
pub fn replace_with<F>(current: Option<Value>, remapping: F) -> Step<bool>
where
    F: FnOnce(Option<&str>) -> Value,
{
    match current {
        None => Step::Keep(false),
        Some(old) => Step::Write(remapping(old.as_deref()), true),
    }
}
