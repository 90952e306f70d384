//! Reading and persisting lifecycle states
//!
//! A state lives in one annotation of a resource. Writes are validated
//! against the transition graph and conditioned on the value observed
//! when validating. Resources that protect the annotation take their lock
//! around the write.

use super::Lifecycle;
use crate::error::{Error, Result};
use crate::resource::{annotations, AnnotatedResource};

/// Outcome of a state change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Already in the requested state; nothing was written
    Unchanged(S),
    /// The new state was written
    Applied { from: S, to: S },
}

impl<S: Copy> Transition<S> {
    /// State after the request
    pub fn state(&self) -> S {
        match self {
            Transition::Unchanged(state) => *state,
            Transition::Applied { to, .. } => *to,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Raw annotation value (empty when missing) and its parsed state
async fn observe<S, R>(resource: &mut R, key: &str) -> Result<(String, S)>
where
    S: Lifecycle,
    R: AnnotatedResource + ?Sized,
{
    let current = resource.annotations().await?;
    let raw = current.get(key).cloned().unwrap_or_default();
    let state = S::parse(&raw);
    Ok((raw, state))
}

/// Read the state stored under `key`
pub async fn get_state<S, R>(resource: &mut R, key: &str) -> Result<S>
where
    S: Lifecycle,
    R: AnnotatedResource + ?Sized,
{
    let (_, state) = observe(resource, key).await?;
    Ok(state)
}

/// Move the state stored under `key` to `next`
pub async fn set_state<S, R>(resource: &mut R, key: &str, next: S) -> Result<Transition<S>>
where
    S: Lifecycle,
    R: AnnotatedResource + ?Sized,
{
    resource.invalidate();
    let (raw, current) = observe::<S, R>(resource, key).await?;

    if current == next {
        return Ok(Transition::Unchanged(current));
    }
    if !current.validate_next_state(next) {
        return Err(Error::InvalidTransition {
            current: current.to_string(),
            next: next.to_string(),
        });
    }

    let check = annotations([(key, raw)]);
    let set = annotations([(key, next.name())]);
    match resource.set_annotations_if(&check, &set).await {
        Ok(()) => {
            tracing::info!("{}: {} {} -> {}", resource.key(), key, current, next);
            Ok(Transition::Applied { from: current, to: next })
        }
        Err(e @ Error::PreconditionFailed { .. }) => {
            // Someone else moved the state first; fine if they moved it where we wanted
            resource.invalidate();
            let (_, now) = observe::<S, R>(resource, key).await?;
            if now == next {
                tracing::debug!("{}: {} already moved to {}", resource.key(), key, next);
                Ok(Transition::Unchanged(now))
            } else {
                Err(e)
            }
        }
        Err(e) => Err(e),
    }
}
