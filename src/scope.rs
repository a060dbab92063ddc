//! Multi-step mutations.
//!
//! A mutating request is applied to the image as a sequence of [`Step`]s. Each step is
//! written as soon as it runs and nothing is rolled back, so a request that fails half way
//! leaves the completed steps in place. The error of a failed step is wrapped in an
//! [`Interrupted`] context listing them.

use std::fmt;

use anyhow::Result;
use log::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Claim an inode and write it out empty.
    AllocateInode,
    /// Claim a data block for a new directory.
    AllocateBlock,
    /// Write `.` and `..` into the new directory.
    SeedDirectory,
    /// Append the new entry to the parent.
    LinkEntry,
    /// Overwrite the removed entry with a tombstone.
    Tombstone,
    /// Trim the parent's size past a trailing tombstone.
    ShrinkParent,
    /// Hand the removed inode and its blocks back to the allocators.
    Release,
}

/// Context attached to the error of a step that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interrupted {
    pub operation: &'static str,
    /// Steps that were applied before the failure.
    pub completed: Vec<Step>,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} interrupted after {:?}", self.operation, self.completed)
    }
}

pub struct Scope {
    operation: &'static str,
    completed: Vec<Step>,
}

impl Scope {
    pub fn begin(operation: &'static str) -> Self {
        Self {
            operation,
            completed: vec![],
        }
    }

    pub fn step<T, F>(&mut self, step: Step, run: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        match run() {
            Ok(value) => {
                trace!("{}: {step:?} done", self.operation);
                self.completed.push(step);
                Ok(value)
            }
            Err(err) => Err(err.context(Interrupted {
                operation: self.operation,
                completed: self.completed.clone(),
            })),
        }
    }

    pub fn completed(&self) -> &[Step] {
        &self.completed
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::error::FsError;

    #[test]
    fn test_steps_are_recorded_in_order() {
        let mut scope = Scope::begin("create");
        scope.step(Step::AllocateInode, || Ok(())).unwrap();
        scope.step(Step::LinkEntry, || Ok(())).unwrap();

        assert_eq!(scope.completed(), [Step::AllocateInode, Step::LinkEntry]);
    }

    #[test]
    fn test_failure_names_completed_steps() {
        let mut scope = Scope::begin("create");
        scope.step(Step::AllocateInode, || Ok(7)).unwrap();
        let err = scope
            .step(Step::AllocateBlock, || -> Result<()> {
                Err(anyhow!(FsError::ResourceExhausted("data region")))
            })
            .unwrap_err();

        let interrupted = err.downcast_ref::<Interrupted>().unwrap();
        assert_eq!(interrupted.completed, [Step::AllocateInode]);
        assert_eq!(
            FsError::of(&err),
            Some(FsError::ResourceExhausted("data region"))
        );
        assert_eq!(scope.completed(), [Step::AllocateInode]);
    }
}
