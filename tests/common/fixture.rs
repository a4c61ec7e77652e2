use std::time::{Duration, Instant};

use orrery::{
    backend::{
        OutputBackend,
        headless::{Connector, HeadlessBackend},
    },
    config::Config,
    layout::{LayoutManager, NOOP_REMOVAL_DELAY},
    output::{OutputConfiguration, OutputHandle, OutputState},
    signal::{OutputSignal, SignalRecorder},
};
use smithay::utils::{Logical, Point};

pub struct Fixture {
    manager: LayoutManager<HeadlessBackend>,
    recorder: SignalRecorder,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_toml(toml: &str) -> Self {
        Self::with_config(Config::from_toml(toml).unwrap())
    }

    pub fn with_config(config: Config) -> Self {
        let recorder = SignalRecorder::new();
        Self {
            manager: LayoutManager::new(HeadlessBackend::new(), config, recorder.clone()),
            recorder,
        }
    }

    /// Starts the backend with the given connectors already plugged in.
    pub fn started(connectors: impl IntoIterator<Item = Connector>) -> Self {
        let mut fixture = Self::new();
        fixture.start(connectors);
        fixture
    }

    pub fn start(&mut self, connectors: impl IntoIterator<Item = Connector>) {
        for connector in connectors {
            self.manager.backend_mut().plug(connector);
        }
        self.pump();
        self.manager.backend_started();
    }

    pub fn manager(&mut self) -> &mut LayoutManager<HeadlessBackend> {
        &mut self.manager
    }

    pub fn backend(&mut self) -> &mut HeadlessBackend {
        self.manager.backend_mut()
    }

    pub fn take_signals(&self) -> Vec<OutputSignal> {
        self.recorder.take()
    }

    /// Hands every queued backend event to the manager.
    pub fn pump(&mut self) {
        loop {
            let events = self.manager.backend_mut().drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.manager.handle_backend_event(event);
            }
        }
    }

    pub fn plug(&mut self, connector: Connector) -> OutputHandle {
        let handle = self.manager.backend_mut().plug(connector);
        self.pump();
        handle
    }

    pub fn unplug(&mut self, output: OutputHandle) {
        self.manager.backend_mut().unplug(output);
        self.pump();
    }

    /// Runs idle work without letting any timer expire.
    pub fn dispatch_idle(&mut self) {
        self.manager.dispatch_pending(Instant::now());
    }

    /// Runs deferred work as if `by` has passed.
    pub fn advance(&mut self, by: Duration) {
        self.manager.dispatch_pending(Instant::now() + by);
    }

    /// Runs deferred work past the fallback output's removal delay.
    pub fn settle(&mut self) {
        self.advance(NOOP_REMOVAL_DELAY + Duration::from_millis(100));
    }

    pub fn handle(&self, name: &str) -> OutputHandle {
        self.manager
            .controller_by_name(name)
            .map(|controller| controller.handle())
            .unwrap_or_else(|| panic!("no output named {name}"))
    }

    pub fn state(&self, name: &str) -> OutputState {
        self.manager
            .controller_by_name(name)
            .map(|controller| controller.current_state().clone())
            .unwrap_or_else(|| panic!("no output named {name}"))
    }

    pub fn location(&self, name: &str) -> Option<Point<i32, Logical>> {
        self.manager.output_location(self.handle(name))
    }

    pub fn configuration(&self) -> OutputConfiguration {
        self.manager.get_current_configuration()
    }

    pub fn noop_active(&self) -> bool {
        self.manager
            .noop()
            .is_some_and(|noop| noop.output().is_some())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        let handle = self.handle(name);
        self.manager.backend().is_enabled(handle)
    }
}

pub fn connector(name: &str) -> Connector {
    Connector::new(name).with_preferred_mode(1920, 1080, 60_000)
}

pub fn small_connector(name: &str) -> Connector {
    Connector::new(name).with_preferred_mode(1280, 720, 60_000)
}
