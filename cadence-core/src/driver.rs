//! Admission-drain loop
//!
//! Each tick admits at most one new request from the catalog, advances the
//! engine by exactly one step, and reports every request whose output came
//! back finished. The loop ends once the admission cap is reached and the
//! engine has nothing left in flight.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::engine::Engine;
use crate::error::DriverError;
use crate::request::RequestOutput;

/// Number of requests admitted by default (ids "0" through "100")
pub const DEFAULT_ADMISSION_CAP: u64 = 101;

/// Configuration for a single driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Total number of requests to admit over the run
    pub admission_cap: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            admission_cap: DEFAULT_ADMISSION_CAP,
        }
    }
}

impl DriverConfig {
    pub fn with_admission_cap(admission_cap: u64) -> Self {
        Self { admission_cap }
    }
}

/// Source of sequence numbers for newly admitted requests.
///
/// A sequence number doubles as the request identifier and the catalog index.
pub trait Admission {
    /// Sequence numbers handed out so far.
    fn admitted(&self) -> u64;

    fn cap(&self) -> u64;

    fn is_exhausted(&self) -> bool {
        self.admitted() >= self.cap()
    }

    /// If the cap has not been reached, call `submit` with the next sequence
    /// number and consume it once `submit` succeeds. Returns the number used,
    /// or `None` when the cap is reached.
    fn admit<F>(&mut self, submit: F) -> Result<Option<u64>, DriverError>
    where
        F: FnOnce(u64) -> Result<(), DriverError>;
}

/// Admission counter owned by a single driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionCounter {
    next: u64,
    cap: u64,
}

impl AdmissionCounter {
    pub fn new(cap: u64) -> Self {
        Self { next: 0, cap }
    }
}

impl Admission for AdmissionCounter {
    fn admitted(&self) -> u64 {
        self.next
    }

    fn cap(&self) -> u64 {
        self.cap
    }

    fn admit<F>(&mut self, submit: F) -> Result<Option<u64>, DriverError>
    where
        F: FnOnce(u64) -> Result<(), DriverError>,
    {
        if self.next >= self.cap {
            return Ok(None);
        }
        let sequence = self.next;
        submit(sequence)?;
        self.next += 1;
        Ok(Some(sequence))
    }
}

/// Admission counter shared by several drivers feeding one engine.
///
/// The lock is held from picking the sequence number through the engine's
/// `submit`, so concurrent drivers never issue the same identifier.
#[derive(Debug)]
pub struct SharedAdmission {
    next: Mutex<u64>,
    cap: u64,
}

impl SharedAdmission {
    pub fn new(cap: u64) -> Self {
        Self {
            next: Mutex::new(0),
            cap,
        }
    }
}

impl Admission for &SharedAdmission {
    fn admitted(&self) -> u64 {
        *self.next.lock()
    }

    fn cap(&self) -> u64 {
        self.cap
    }

    fn admit<F>(&mut self, submit: F) -> Result<Option<u64>, DriverError>
    where
        F: FnOnce(u64) -> Result<(), DriverError>,
    {
        let mut next = self.next.lock();
        if *next >= self.cap {
            return Ok(None);
        }
        let sequence = *next;
        submit(sequence)?;
        *next += 1;
        Ok(Some(sequence))
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick number
    pub tick: u64,
    /// Identifier admitted this tick, if any
    pub admitted: Option<String>,
    /// Outputs returned by the engine step
    pub outputs: usize,
    /// Requests reported as finished
    pub completed: usize,
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Requests admitted by this driver
    pub admitted: u64,
    /// Finished requests reported by this driver
    pub completed: u64,
}

/// Drives an engine with requests drawn from a catalog.
pub struct Driver<E, A = AdmissionCounter> {
    engine: E,
    catalog: Arc<Catalog>,
    admission: A,
    ticks: u64,
    admitted: u64,
    completed: u64,
}

impl<E: Engine> Driver<E> {
    /// Create a driver with its own admission counter.
    pub fn new(engine: E, catalog: impl Into<Arc<Catalog>>, config: DriverConfig) -> Self {
        Self::with_admission(engine, catalog, AdmissionCounter::new(config.admission_cap))
    }
}

impl<E: Engine, A: Admission> Driver<E, A> {
    pub fn with_admission(engine: E, catalog: impl Into<Arc<Catalog>>, admission: A) -> Self {
        Self {
            engine,
            catalog: catalog.into(),
            admission,
            ticks: 0,
            admitted: 0,
            completed: 0,
        }
    }

    /// Loop continue condition: admissions remain or the engine is busy.
    pub fn should_continue(&self) -> bool {
        !self.admission.is_exhausted() || self.engine.has_pending_work()
    }

    /// Run one admit, advance, drain iteration.
    ///
    /// `on_complete` is called once for every output the step returned with
    /// its terminal flag set, in the order the engine returned them.
    pub fn tick<F>(&mut self, mut on_complete: F) -> Result<TickReport, DriverError>
    where
        F: FnMut(&RequestOutput),
    {
        self.ticks += 1;
        let tick = self.ticks;

        let engine = &self.engine;
        let catalog = &self.catalog;
        let admitted = self.admission.admit(|sequence| {
            let request_id = sequence.to_string();
            let request = catalog.entry_at(sequence).to_request(request_id.clone());
            engine
                .submit(request)
                .map_err(|source| DriverError::Submit {
                    tick,
                    request_id,
                    source,
                })
        })?;
        if let Some(sequence) = admitted {
            self.admitted += 1;
            debug!(tick, request_id = sequence, "Admitted request");
        }

        let outputs = self
            .engine
            .step()
            .map_err(|source| DriverError::Step { tick, source })?;

        let mut completed = 0;
        for output in outputs.iter().filter(|output| output.finished) {
            debug!(tick, request_id = %output.request_id, "Request finished");
            on_complete(output);
            completed += 1;
        }
        self.completed += completed as u64;

        Ok(TickReport {
            tick,
            admitted: admitted.map(|sequence| sequence.to_string()),
            outputs: outputs.len(),
            completed,
        })
    }

    /// Tick until the continue condition becomes false.
    ///
    /// The first submit or step failure aborts the run; requests reported
    /// before the failure stay reported.
    pub fn run<F>(&mut self, mut on_complete: F) -> Result<RunSummary, DriverError>
    where
        F: FnMut(&RequestOutput),
    {
        info!(
            admission_cap = self.admission.cap(),
            catalog_len = self.catalog.len(),
            "Starting admission-drain loop"
        );

        while self.should_continue() {
            self.tick(&mut on_complete)?;
        }

        let summary = self.summary();
        info!(
            ticks = summary.ticks,
            admitted = summary.admitted,
            completed = summary.completed,
            "Admission-drain loop finished"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            admitted: self.admitted,
            completed: self.completed,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
