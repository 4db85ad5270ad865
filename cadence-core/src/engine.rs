//! Engine capability trait
//!
//! The driver only needs three things from an inference engine: hand it a
//! request, advance all in-flight work by one step, and ask whether anything
//! is still unfinished. Model execution, batching and memory management stay
//! behind this trait.

use std::sync::Arc;

use crate::error::EngineError;
use crate::request::{Request, RequestOutput};

/// A stateful inference engine driven one step at a time.
///
/// Methods take `&self` so one engine can be shared by several drivers;
/// implementations keep their state behind interior mutability.
pub trait Engine {
    /// Queue a request. Fails with [`EngineError::InvalidConfiguration`] for
    /// inconsistent sampling parameters and [`EngineError::DuplicateIdentifier`]
    /// if the id belongs to a request that has not finished.
    fn submit(&self, request: Request) -> Result<(), EngineError>;

    /// Advance every in-flight request by one unit of progress and return the
    /// outputs of those that progressed. Each request's output has
    /// `finished == true` on exactly one step.
    fn step(&self) -> Result<Vec<RequestOutput>, EngineError>;

    /// Whether any submitted request has not reached a terminal state.
    fn has_pending_work(&self) -> bool;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn submit(&self, request: Request) -> Result<(), EngineError> {
        (**self).submit(request)
    }

    fn step(&self) -> Result<Vec<RequestOutput>, EngineError> {
        (**self).step()
    }

    fn has_pending_work(&self) -> bool {
        (**self).has_pending_work()
    }
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
    fn submit(&self, request: Request) -> Result<(), EngineError> {
        (**self).submit(request)
    }

    fn step(&self) -> Result<Vec<RequestOutput>, EngineError> {
        (**self).step()
    }

    fn has_pending_work(&self) -> bool {
        (**self).has_pending_work()
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn submit(&self, request: Request) -> Result<(), EngineError> {
        (**self).submit(request)
    }

    fn step(&self) -> Result<Vec<RequestOutput>, EngineError> {
        (**self).step()
    }

    fn has_pending_work(&self) -> bool {
        (**self).has_pending_work()
    }
}
