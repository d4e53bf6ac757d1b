// src/lock.rs

//! System-wide single-instance lock.
//!
//! A held lock is an `InstanceLock` value. Dropping it releases the OS
//! resource, so every exit path (including `?` and unwinding) gives the lock
//! back without explicit cleanup code.

use crate::error::StretchError;
use std::fmt;

/// OS resource backing a held lock. Releasing happens in the implementor's `Drop`.
pub trait HeldLock: fmt::Debug {}

/// Acquires named system-wide locks.
pub trait InstanceLocker {
    /// Takes the lock called `name`, or fails with `StretchError::AlreadyRunning`
    /// if another holder exists. Never blocks.
    fn acquire(&mut self, name: &str) -> Result<InstanceLock, StretchError>;
}

/// A held instance lock.
#[derive(Debug)]
pub struct InstanceLock {
    name: String,
    _held: Box<dyn HeldLock>,
}

impl InstanceLock {
    pub fn new(name: impl Into<String>, held: Box<dyn HeldLock>) -> Self {
        let name = name.into();
        log::debug!("Instance lock '{}' acquired", name);
        Self { name, _held: held }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        log::debug!("Releasing instance lock '{}'", self.name);
    }
}
