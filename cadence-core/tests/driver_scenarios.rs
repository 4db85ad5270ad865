use std::collections::HashSet;
use std::sync::Arc;

use cadence_core::*;
use parking_lot::Mutex;

/// Engine event, recorded in call order
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Submit(String),
    Step,
}

#[derive(Default)]
struct ScriptState {
    /// (id, steps left until the terminal output)
    in_flight: Vec<(String, u32)>,
    events: Vec<Event>,
    submitted: Vec<Request>,
    steps: u64,
}

/// In-memory engine whose completion timing is scripted per identifier.
///
/// A request with latency `L` produces non-terminal outputs on its first
/// `L - 1` steps and its terminal output on step `L`.
struct ScriptedEngine {
    state: Mutex<ScriptState>,
    latency: Box<dyn Fn(&str) -> u32 + Send + Sync>,
    fail_on_step: Option<u64>,
}

impl ScriptedEngine {
    fn with_latency(latency: impl Fn(&str) -> u32 + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            latency: Box::new(latency),
            fail_on_step: None,
        }
    }

    /// Terminal output on the step after the one following submission
    fn next_step() -> Self {
        Self::with_latency(|_| 2)
    }

    fn failing_on_step(mut self, step: u64) -> Self {
        self.fail_on_step = Some(step);
        self
    }

    /// Queue work that was submitted before any driver started
    fn preload(&self, id: &str, latency: u32) {
        self.state.lock().in_flight.push((id.to_string(), latency));
    }

    fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    fn submitted(&self) -> Vec<Request> {
        self.state.lock().submitted.clone()
    }
}

impl Engine for ScriptedEngine {
    fn submit(&self, request: Request) -> Result<(), EngineError> {
        request.params.validate()?;
        let mut state = self.state.lock();
        if state.in_flight.iter().any(|(id, _)| *id == request.id) {
            return Err(EngineError::DuplicateIdentifier(request.id));
        }
        state.events.push(Event::Submit(request.id.clone()));
        state.in_flight.push((request.id.clone(), (self.latency)(&request.id).max(1)));
        state.submitted.push(request);
        Ok(())
    }

    fn step(&self) -> Result<Vec<RequestOutput>, EngineError> {
        let mut state = self.state.lock();
        state.steps += 1;
        state.events.push(Event::Step);
        if self.fail_on_step == Some(state.steps) {
            return Err(EngineError::fault("device lost"));
        }

        let mut outputs = Vec::new();
        for (id, left) in state.in_flight.iter_mut() {
            *left -= 1;
            outputs.push(RequestOutput::new(id.clone(), *left == 0));
        }
        state.in_flight.retain(|(_, left)| *left > 0);
        Ok(outputs)
    }

    fn has_pending_work(&self) -> bool {
        !self.state.lock().in_flight.is_empty()
    }
}

fn run_collecting<E: Engine>(driver: &mut Driver<E>) -> (Result<RunSummary, DriverError>, Vec<String>) {
    let mut reported = Vec::new();
    let result = driver.run(|output| reported.push(output.request_id.clone()));
    (result, reported)
}

#[test]
fn test_scenario_a_four_requests_five_ticks() {
    let mut driver = Driver::new(
        ScriptedEngine::next_step(),
        Catalog::standard(),
        DriverConfig::with_admission_cap(4),
    );

    let (result, reported) = run_collecting(&mut driver);
    let summary = result.unwrap();

    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.admitted, 4);
    assert_eq!(summary.completed, 4);
    assert_eq!(reported, vec!["0", "1", "2", "3"]);
    assert!(!driver.should_continue());
}

#[test]
fn test_scenario_b_request_seven_reuses_beam_entry() {
    let catalog = Catalog::standard();
    assert_eq!(catalog.len(), 4);
    assert_eq!(catalog.entry_at(7), catalog.entry_at(3));
    assert!(catalog.entry_at(7).params.use_beam_search);

    let mut driver = Driver::new(
        ScriptedEngine::next_step(),
        catalog,
        DriverConfig::with_admission_cap(100),
    );
    driver.run(|_| {}).unwrap();

    let submitted = driver.engine().submitted();
    assert_eq!(submitted.len(), 100);
    let seventh = &submitted[7];
    assert_eq!(seventh.id, "7");
    assert_eq!(seventh.params, driver.catalog().entry_at(3).params);
    assert_eq!(seventh.priority, driver.catalog().entry_at(3).priority);
    assert_eq!(seventh.prompt, driver.catalog().entry_at(3).prompt);
}

#[test]
fn test_scenario_c_duplicate_identifier_aborts_after_reporting() {
    // "5" stays in flight long after the others finish
    let engine = ScriptedEngine::with_latency(|id| if id == "5" { 1_000 } else { 2 });

    let mut first = Driver::new(&engine, Catalog::standard(), DriverConfig::with_admission_cap(6));
    let mut first_reported = Vec::new();
    for _ in 0..6 {
        first
            .tick(|output| first_reported.push(output.request_id.clone()))
            .unwrap();
    }
    assert_eq!(first_reported, vec!["0", "1", "2", "3", "4"]);
    assert!(engine.has_pending_work());

    // A second driver sharing the engine restarts its own numbering at "0"
    let mut second = Driver::new(&engine, Catalog::standard(), DriverConfig::with_admission_cap(6));
    let (result, reported) = run_collecting(&mut second);

    let err = result.unwrap_err();
    assert_eq!(err.tick(), Some(6));
    assert_eq!(
        err.engine_error(),
        Some(&EngineError::DuplicateIdentifier("5".to_string()))
    );
    assert_eq!(err.request_id(), Some("5"));
    assert_eq!(reported, vec!["0", "1", "2", "3"]);
    assert_eq!(second.summary().admitted, 5);
    assert_eq!(second.summary().completed, 4);
}

#[test]
fn test_scenario_d_zero_cap_idle_engine_runs_no_ticks() {
    let mut driver = Driver::new(
        ScriptedEngine::next_step(),
        Catalog::standard(),
        DriverConfig::with_admission_cap(0),
    );

    let (result, reported) = run_collecting(&mut driver);
    let summary = result.unwrap();

    assert_eq!(summary.ticks, 0);
    assert!(reported.is_empty());
    assert!(driver.engine().events().is_empty());
}

#[test]
fn test_zero_cap_still_drains_pending_work() {
    let engine = ScriptedEngine::next_step();
    engine.preload("warm", 3);

    let mut driver = Driver::new(engine, Catalog::standard(), DriverConfig::with_admission_cap(0));
    let (result, reported) = run_collecting(&mut driver);

    assert_eq!(result.unwrap().ticks, 3);
    assert_eq!(reported, vec!["warm"]);
    assert!(driver
        .engine()
        .events()
        .iter()
        .all(|event| *event == Event::Step));
}

#[test]
fn test_identifiers_are_monotonic_and_unique() {
    let engine = ScriptedEngine::with_latency(|id| id.parse::<u32>().unwrap_or(0) % 5 + 1);
    let mut driver = Driver::new(engine, Catalog::standard(), DriverConfig::with_admission_cap(25));
    driver.run(|_| {}).unwrap();

    let ids: Vec<String> = driver
        .engine()
        .submitted()
        .into_iter()
        .map(|request| request.id)
        .collect();
    let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_every_request_reported_exactly_once() {
    let engine = ScriptedEngine::with_latency(|id| id.parse::<u32>().unwrap_or(0) % 7 + 1);
    let mut driver = Driver::new(engine, Catalog::standard(), DriverConfig::with_admission_cap(40));

    let (result, reported) = run_collecting(&mut driver);
    let summary = result.unwrap();

    let unique: HashSet<&String> = reported.iter().collect();
    assert_eq!(reported.len(), 40);
    assert_eq!(unique.len(), 40);
    assert_eq!(summary.completed, 40);
    assert!(!driver.engine().has_pending_work());
}

#[test]
fn test_admission_interleaves_with_steps() {
    let mut driver = Driver::new(
        ScriptedEngine::with_latency(|_| 3),
        Catalog::standard(),
        DriverConfig::with_admission_cap(3),
    );
    driver.run(|_| {}).unwrap();

    let events = driver.engine().events();
    let expected_prefix = vec![
        Event::Submit("0".to_string()),
        Event::Step,
        Event::Submit("1".to_string()),
        Event::Step,
        Event::Submit("2".to_string()),
        Event::Step,
    ];
    assert_eq!(events[..6], expected_prefix[..]);
    // Request "2" needs two more steps after the cap is reached
    assert_eq!(events[6..], [Event::Step, Event::Step]);
}

#[test]
fn test_tick_report_contents() {
    let mut driver = Driver::new(
        ScriptedEngine::next_step(),
        Catalog::standard(),
        DriverConfig::with_admission_cap(1),
    );

    let first = driver.tick(|_| {}).unwrap();
    assert_eq!(first.tick, 1);
    assert_eq!(first.admitted.as_deref(), Some("0"));
    assert_eq!(first.outputs, 1);
    assert_eq!(first.completed, 0);

    let second = driver.tick(|_| {}).unwrap();
    assert_eq!(second.tick, 2);
    assert_eq!(second.admitted, None);
    assert_eq!(second.completed, 1);
    assert!(!driver.should_continue());
}

#[test]
fn test_step_fault_aborts_with_tick() {
    let engine = ScriptedEngine::with_latency(|_| 1).failing_on_step(3);
    let mut driver = Driver::new(engine, Catalog::standard(), DriverConfig::with_admission_cap(10));

    let (result, reported) = run_collecting(&mut driver);
    let err = result.unwrap_err();

    assert!(matches!(err, DriverError::Step { tick: 3, .. }));
    assert_eq!(err.to_string(), "tick 3: engine step failed");
    assert!(matches!(err.engine_error(), Some(EngineError::Fault { .. })));
    // The scripted fault is not tied to a request
    assert_eq!(err.request_id(), None);
    // Completions from earlier ticks were already reported
    assert_eq!(reported, vec!["0", "1"]);
    assert_eq!(driver.ticks(), 3);
}

#[test]
fn test_shared_admission_across_threads() {
    let engine = ScriptedEngine::with_latency(|id| id.parse::<u32>().unwrap_or(0) % 4 + 1);
    let shared = SharedAdmission::new(60);
    let catalog = Arc::new(Catalog::standard());
    let reported = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..3 {
            let catalog = catalog.clone();
            let (engine, shared, reported) = (&engine, &shared, &reported);
            scope.spawn(move || {
                let mut driver = Driver::with_admission(engine, catalog, shared);
                driver
                    .run(|output| reported.lock().push(output.request_id.clone()))
                    .unwrap();
            });
        }
    });

    let mut reported = reported.into_inner();
    reported.sort_by_key(|id| id.parse::<u32>().unwrap_or(u32::MAX));
    let expected: Vec<String> = (0..60).map(|i| i.to_string()).collect();
    assert_eq!(reported, expected);
    assert_eq!(engine.submitted().len(), 60);
}
