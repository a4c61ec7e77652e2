use common::fixture::{Fixture, connector};
use orrery::{
    backend::{OutputBackend, headless::Connector},
    output::BitDepth,
};
use smithay::{backend::allocator::Fourcc, output::Mode};
use test_log::test;

mod common;

fn mode(w: i32, h: i32, refresh: i32) -> Mode {
    Mode {
        size: (w, h).into(),
        refresh,
    }
}

#[test]
fn default_mode_prefers_the_preferred_mode() {
    let fixture = Fixture::started([
        Connector::new("DP-1")
            .with_mode(1280, 720, 60_000)
            .with_preferred_mode(1920, 1080, 60_000)
            .with_mode(2560, 1440, 60_000),
        Connector::new("DP-2")
            .with_mode(1280, 720, 60_000)
            .with_mode(2560, 1440, 60_000),
    ]);

    assert_eq!(fixture.state("DP-1").mode, mode(1920, 1080, 60_000));
    // Without a preferred mode the last one is used
    assert_eq!(fixture.state("DP-2").mode, mode(2560, 1440, 60_000));
}

#[test]
fn configured_resolutions_pick_the_closest_refresh() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        mode = "1920x1080@120"

        [output.DP-2]
        mode = "1920x1080"
        "#,
    );
    let modes = |name: &str| {
        Connector::new(name)
            .with_mode(1920, 1080, 60_000)
            .with_preferred_mode(1920, 1080, 75_000)
            .with_mode(1920, 1080, 144_000)
            .drm()
    };
    fixture.start([modes("DP-1"), modes("DP-2")]);

    let dp1 = fixture.handle("DP-1");
    let dp2 = fixture.handle("DP-2");
    assert_eq!(
        fixture.manager().backend().current_mode(dp1),
        Some(mode(1920, 1080, 144_000))
    );
    assert_eq!(
        fixture.manager().backend().current_mode(dp2),
        Some(mode(1920, 1080, 75_000))
    );
}

#[test]
fn unsupported_modes_fall_back_to_the_default() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        mode = "2560x1440@60"
        "#,
    );
    fixture.start([connector("DP-1").drm()]);

    assert_eq!(fixture.state("DP-1").mode, mode(1920, 1080, 60_000));
    assert!(fixture.is_enabled("DP-1"));
}

#[test]
fn custom_modelines_extend_drm_mode_lists() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        mode = "1920x1080@60"
        custom_modes = ["148.5 1920 2008 2052 2200 1080 1084 1089 1125 +hsync +vsync"]
        "#,
    );
    fixture.start([Connector::new("DP-1")
        .with_preferred_mode(1280, 720, 60_000)
        .drm()]);
    let dp1 = fixture.handle("DP-1");

    assert_eq!(fixture.state("DP-1").mode, mode(1920, 1080, 60_000));
    assert_eq!(
        fixture.manager().backend().current_mode(dp1),
        Some(mode(1920, 1080, 60_000))
    );
    assert!(
        fixture
            .manager()
            .backend()
            .modes(dp1)
            .iter()
            .any(|adv| adv.mode == mode(1920, 1080, 60_000))
    );

    // Applying again doesn't add the mode twice
    fixture.manager().reconfigure_from_config();
    assert_eq!(fixture.manager().backend().modes(dp1).len(), 2);
}

#[test]
fn arbitrary_modes_on_outputs_with_custom_mode_support() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        mode = "1000x800"
        "#,
    );
    fixture.start([connector("DP-1")]);
    let dp1 = fixture.handle("DP-1");

    assert_eq!(
        fixture.manager().backend().current_mode(dp1).map(|mode| mode.size),
        Some((1000, 800).into())
    );
    let commit = fixture
        .backend()
        .commits()
        .iter()
        .find(|commit| commit.output == dp1 && commit.state.custom_mode.is_some())
        .cloned();
    assert!(commit.is_some_and(|commit| commit.accepted));
}

#[test]
fn ten_bit_depth_tries_formats_in_order() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        depth = 10
        "#,
    );
    fixture.backend().rejected_formats = vec![Fourcc::Xrgb2101010];
    fixture.start([connector("DP-1")]);
    let dp1 = fixture.handle("DP-1");

    assert_eq!(
        fixture.manager().backend().render_format(dp1),
        Some(Fourcc::Xbgr2101010)
    );
    assert_eq!(
        fixture.manager().controller(dp1).map(|c| c.current_bit_depth()),
        Some(BitDepth::Ten)
    );
}

#[test]
fn ten_bit_depth_falls_back_to_eight_bit() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        depth = 10
        "#,
    );
    fixture.backend().rejected_formats = vec![Fourcc::Xrgb2101010, Fourcc::Xbgr2101010];
    fixture.start([connector("DP-1")]);
    let dp1 = fixture.handle("DP-1");

    assert_eq!(
        fixture.manager().backend().render_format(dp1),
        Some(Fourcc::Xrgb8888)
    );

    fixture.dispatch_idle();
    let head = fixture.manager().output_management_state.head(dp1).cloned();
    assert_eq!(head.map(|head| head.depth), Some(BitDepth::Eight));
}

#[test]
fn rejected_adaptive_sync_stays_off() {
    let mut fixture = Fixture::with_toml(
        r#"
        [output.DP-1]
        vrr = true

        [output.DP-2]
        vrr = true
        "#,
    );
    fixture.start([connector("DP-1")]);
    let dp1 = fixture.handle("DP-1");
    assert!(fixture.manager().backend().adaptive_sync_enabled(dp1));

    fixture.backend().reject_adaptive_sync = true;
    let dp2 = fixture.plug(connector("DP-2"));

    assert!(!fixture.manager().backend().adaptive_sync_enabled(dp2));
    // The output still works
    assert!(fixture.is_enabled("DP-2"));
    assert!(fixture.state("DP-2").vrr);
}
