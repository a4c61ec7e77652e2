use std::time::Instant;

use anyhow::Context;
use orrery::{
    backend::headless::HeadlessBackend,
    cli::{Cli, Hardware},
    config::{Config, get_config_dir},
    layout::LayoutManager,
    output::{ImageSource, OutputState, transform_name},
    signal::OutputSignal,
};
use smithay::{
    reexports::calloop::{
        EventLoop,
        channel::{self, Event},
    },
    utils::{Logical, Point},
};
use tracing::{debug, info, warn};

struct Simulation {
    manager: LayoutManager<HeadlessBackend>,
    signals: usize,
}

fn main() -> anyhow::Result<()> {
    match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(env_filter) => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(env_filter)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
        }
    }

    let cli = Cli::parse_and_expand();

    let config = match cli.config_dir.clone().or_else(get_config_dir) {
        Some(dir) => Config::load_from_dir(&dir)?,
        None => {
            warn!("No config directory found, using the default config");
            Config::default()
        }
    };

    let hardware = match cli.hardware.as_ref() {
        Some(path) => Hardware::load(path)?,
        None => Hardware::single_output(),
    };

    let mut event_loop: EventLoop<Simulation> =
        EventLoop::try_new().context("failed to create the event loop")?;

    let (sender, receiver) = channel::channel::<OutputSignal>();
    event_loop
        .handle()
        .insert_source(receiver, |event, _, sim| {
            if let Event::Msg(signal) = event {
                debug!(?signal, "Output signal");
                sim.signals += 1;
            }
        })
        .map_err(|err| anyhow::anyhow!("failed to insert the signal channel: {}", err.error))?;

    let mut backend = HeadlessBackend::new();
    for connector in hardware.connectors()? {
        backend.plug(connector);
    }

    let mut sim = Simulation {
        manager: LayoutManager::new(backend, config, sender),
        signals: 0,
    };

    for event in sim.manager.backend_mut().drain_events() {
        sim.manager.handle_backend_event(event);
    }
    sim.manager.backend_started();

    loop {
        for event in sim.manager.backend_mut().drain_events() {
            sim.manager.handle_backend_event(event);
        }

        sim.manager.dispatch_pending(Instant::now());

        let Some(deadline) = sim.manager.next_deadline() else {
            break;
        };

        event_loop
            .dispatch(Some(deadline.saturating_duration_since(Instant::now())), &mut sim)
            .context("failed to dispatch the event loop")?;
    }

    event_loop
        .dispatch(Some(std::time::Duration::ZERO), &mut sim)
        .context("failed to dispatch the event loop")?;
    info!("Layout settled after {} signals", sim.signals);

    if cli.check {
        let rejected_commits = sim
            .manager
            .backend()
            .commits()
            .iter()
            .filter(|commit| !commit.accepted)
            .count();
        let configuration = sim.manager.load_configuration();
        let accepted = sim.manager.test_configuration(&configuration);

        if rejected_commits > 0 || !accepted {
            anyhow::bail!(
                "configuration is not applicable: {rejected_commits} rejected hardware commits"
            );
        }

        println!("Configuration OK");
        return Ok(());
    }

    for controller in sim.manager.controllers() {
        println!(
            "{}: {}",
            controller.name(),
            describe(
                controller.current_state(),
                sim.manager.output_location(controller.handle()),
            )
        );
    }

    for (_, info) in sim.manager.leasable_outputs() {
        println!("{}: leasable", info.name);
    }

    sim.manager.shutdown();

    Ok(())
}

fn describe(state: &OutputState, loc: Option<Point<i32, Logical>>) -> String {
    let geometry = || {
        let loc = loc.unwrap_or_default();
        format!(
            "{}x{}@{:.3} at {},{} scale {} transform {} {}-bit",
            state.mode.size.w,
            state.mode.size.h,
            state.mode.refresh as f64 / 1000.0,
            loc.x,
            loc.y,
            state.scale,
            transform_name(state.transform),
            state.depth.bits(),
        )
    };

    match &state.source {
        ImageSource::Off => "off".to_string(),
        ImageSource::Direct => geometry(),
        ImageSource::Dpms => format!("powered off, {}", geometry()),
        ImageSource::Mirror(from) => format!("mirroring {from}"),
    }
}
