//! Fleet integration tests
//!
//! Drives the full controller stack against simulated radios and a mock
//! controller host.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rf_controller::{Fleet, Parameter, PowerTarget};
use rf_core::config::{AttributeConfig, ControllerConfig, DeviceDescriptor};
use rf_core::{DeviceId, FleetError, GainMode, Mode};
use rf_test_harness::{MockHost, MockShell};

struct Bench {
    fleet: Arc<Fleet>,
    shell: MockShell,
    host: MockHost,
    attributes: AttributeConfig,
}

fn device(id: &str, port: Option<&str>, relays: [u8; 3]) -> DeviceDescriptor {
    DeviceDescriptor {
        power_port: port.map(str::to_string),
        relays: Some(relays),
        ..DeviceDescriptor::new(id, format!("{}.local", id))
    }
}

fn bench_with(devices: Vec<DeviceDescriptor>) -> Bench {
    let mut config = ControllerConfig::default();
    config.devices = devices;
    config.retry.base_delay = Duration::from_millis(10);
    config.validate().unwrap();

    let attributes = config.attributes.clone();
    let shell = MockShell::with_attributes(&attributes);
    let host = MockHost::new();
    let fleet = Arc::new(Fleet::new(
        &config,
        Arc::new(shell.clone()),
        Arc::new(host.clone()),
    ));

    Bench {
        fleet,
        shell,
        host,
        attributes,
    }
}

fn bench() -> Bench {
    bench_with(vec![
        device("d1", Some("1"), [1, 0, 0]),
        device("d2", Some("2"), [0, 1, 0]),
    ])
}

fn id(s: &str) -> DeviceId {
    DeviceId::new(s)
}

fn uhubctl(host: &MockHost) -> Vec<String> {
    host.commands()
        .into_iter()
        .filter(|c| c.starts_with("uhubctl"))
        .collect()
}

#[tokio::test]
async fn test_init_brings_device_to_baseline() {
    let bench = bench();
    let d1 = id("d1");

    let before = bench.fleet.state(&d1).unwrap();
    assert!(!before.connected);
    assert!(!before.initialized);

    bench.fleet.init(&d1).await.unwrap();

    let state = bench.fleet.state(&d1).unwrap();
    assert!(state.connected);
    assert!(state.initialized);
    assert_eq!(state.gain, 0);
    assert_eq!(state.gain_mode, GainMode::Manual);
    assert_eq!(state.mode(), Mode::None);
    assert!(!state.tx_on());
    assert!(state.last_updated.is_some());
}

#[tokio::test]
async fn test_set_mode_energizes_mapped_relay() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();

    bench.fleet.set_mode(&d1, Mode::Wn).await.unwrap();

    let state = bench.fleet.state(&d1).unwrap();
    let flags = state.mode_flags();
    assert!(flags.wn);
    assert_eq!(flags.active_count(), 1);
    assert!(state.tx_on());

    assert_eq!(bench.fleet.relay_state().await, [true, false, false]);
    // Relay lines are active-low.
    assert_eq!(bench.host.line(17), Some(false));
    assert_eq!(bench.host.line(27), Some(true));

    bench.fleet.set_mode(&d1, Mode::None).await.unwrap();
    assert_eq!(bench.fleet.relay_state().await, [false, false, false]);
    assert_eq!(bench.host.line(17), Some(true));
}

#[tokio::test]
async fn test_ntsc_and_none() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();

    bench.fleet.set_mode(&d1, Mode::Ntsc).await.unwrap();
    let state = bench.fleet.state(&d1).unwrap();
    assert_eq!(state.sampling_freq, 20_000_000);
    assert!(state.mode_flags().ntsc);

    bench.fleet.set_mode(&d1, Mode::None).await.unwrap();
    let state = bench.fleet.state(&d1).unwrap();
    assert!(!state.tx_on());
    assert_eq!(state.mode_flags().active_count(), 0);
}

#[tokio::test]
async fn test_mode_string_must_be_known() {
    assert_eq!(
        "sweep".parse::<Mode>().unwrap_err(),
        FleetError::InvalidMode("sweep".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh_isolates_failing_device() {
    let bench = bench();
    let (d1, d2) = (id("d1"), id("d2"));
    let report = bench.fleet.bring_up().await;
    assert!(report.is_success());

    bench.shell.set_attribute(&d1, &bench.attributes.gain, "12");
    bench.shell.set_attribute(&d2, &bench.attributes.gain, "34");
    bench
        .shell
        .fail_command(&d2, &format!("cat {}", bench.attributes.freq), usize::MAX);
    let d2_before = bench.fleet.state(&d2).unwrap();

    let cancel = CancellationToken::new();
    let sync = bench.fleet.spawn_sync(cancel.clone());
    tokio::time::sleep(Duration::from_secs(31)).await;
    cancel.cancel();
    sync.await.unwrap();

    let s1 = bench.fleet.state(&d1).unwrap();
    assert_eq!(s1.gain, 12);
    assert!(s1.error.is_none());
    assert!(s1.last_updated.is_some());

    let s2 = bench.fleet.state(&d2).unwrap();
    assert!(s2.error.is_some());
    assert_eq!(s2.gain, d2_before.gain);
    assert_eq!(s2.freq, d2_before.freq);
    assert_eq!(s2.last_updated, d2_before.last_updated);
}

#[tokio::test]
async fn test_tunable_writes_require_init() {
    let bench = bench();
    let d1 = id("d1");

    assert_eq!(
        bench.fleet.set_gain(&d1, 10).await.unwrap_err(),
        FleetError::NotInitialized(d1.clone())
    );
    assert_eq!(
        bench.fleet.set_mode(&d1, Mode::Fsk).await.unwrap_err(),
        FleetError::NotInitialized(d1.clone())
    );
    assert!(bench.shell.commands(&d1).is_empty());
}

#[tokio::test]
async fn test_set_parameters() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();

    bench.fleet.set_gain(&d1, 30).await.unwrap();
    bench.fleet.set_freq(&d1, 915_000_000).await.unwrap();
    bench
        .fleet
        .set_parameter(&d1, Parameter::GainMode, "auto")
        .await
        .unwrap();
    bench
        .fleet
        .set_parameter(&d1, "sampling_freq".parse().unwrap(), "2500000")
        .await
        .unwrap();

    let state = bench.fleet.state(&d1).unwrap();
    assert_eq!(state.gain, 30);
    assert_eq!(state.freq, 915_000_000);
    assert_eq!(state.gain_mode, GainMode::Auto);
    assert_eq!(state.sampling_freq, 2_500_000);
    assert_eq!(
        bench.shell.attribute(&d1, &bench.attributes.gain_mode).as_deref(),
        Some("slow_attack")
    );
}

#[tokio::test]
async fn test_invalid_values_rejected_before_device() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();
    bench.shell.clear_history(&d1);

    assert!(matches!(
        bench.fleet.set_sampling_freq(&d1, 0).await,
        Err(FleetError::InvalidValue(_))
    ));
    assert!(matches!(
        bench.fleet.set_parameter(&d1, Parameter::Freq, "fast").await,
        Err(FleetError::InvalidValue(_))
    ));
    assert!(matches!(
        bench
            .fleet
            .set_parameter(&d1, Parameter::GainMode, "fast_attack")
            .await,
        Err(FleetError::InvalidValue(_))
    ));
    for (parameter, raw) in [
        (Parameter::Gain, "5 junk"),
        (Parameter::Gain, "30.7"),
        (Parameter::Freq, "1e30"),
    ] {
        assert!(
            matches!(
                bench.fleet.set_parameter(&d1, parameter, raw).await,
                Err(FleetError::InvalidValue(_))
            ),
            "{} accepted",
            raw
        );
    }
    assert!(bench.shell.commands(&d1).is_empty());
}

#[tokio::test]
async fn test_unknown_device() {
    let bench = bench();
    let ghost = id("ghost");

    assert_eq!(
        bench.fleet.init(&ghost).await.unwrap_err(),
        FleetError::UnknownDevice(ghost.clone())
    );
    assert_eq!(
        bench.fleet.state(&ghost).unwrap_err(),
        FleetError::UnknownDevice(ghost.clone())
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_inits_share_one_handshake_per_device() {
    let bench = bench();
    bench.shell.set_connect_delay(Duration::from_millis(200));
    let (d1, d2) = (id("d1"), id("d2"));

    let (r1, r2, r3) = tokio::join!(
        bench.fleet.init(&d1),
        bench.fleet.init(&d2),
        bench.fleet.refresh(&d1),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    assert_eq!(bench.shell.connect_count(&d1), 1);
    assert_eq!(bench.shell.connect_count(&d2), 1);
}

#[tokio::test]
async fn test_same_device_writes_do_not_interleave() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();
    bench.shell.clear_history(&d1);

    let (a, b) = tokio::join!(bench.fleet.set_gain(&d1, 10), bench.fleet.set_gain(&d1, 20));
    a.unwrap();
    b.unwrap();

    let commands = bench.shell.commands(&d1);
    let first = commands
        .iter()
        .position(|c| c.starts_with("echo 10 "))
        .unwrap();
    let second = commands
        .iter()
        .position(|c| c.starts_with("echo 20 "))
        .unwrap();
    // The first write's refresh (four reads) completes before the second
    // write starts.
    assert_eq!(second - first, 5);
    assert!(commands[first + 1..second].iter().all(|c| c.starts_with("cat ")));
    assert_eq!(bench.fleet.state(&d1).unwrap().gain, 20);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_requires_reinit() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();

    bench.shell.drop_sessions(&d1);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let state = bench.fleet.state(&d1).unwrap();
    assert!(!state.connected);
    assert!(!state.initialized);
    assert_eq!(
        bench.fleet.set_gain(&d1, 5).await.unwrap_err(),
        FleetError::NotInitialized(d1.clone())
    );

    bench.fleet.reconnect(&d1).await.unwrap();
    let state = bench.fleet.state(&d1).unwrap();
    assert!(state.connected);
    assert!(state.initialized);
    assert_eq!(bench.shell.connect_count(&d1), 2);
}

#[tokio::test(start_paused = true)]
async fn test_device_power_cycle() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();
    bench.fleet.set_mode(&d1, Mode::Fsk).await.unwrap();

    let started = tokio::time::Instant::now();
    let report = bench
        .fleet
        .restart_power(PowerTarget::Device(d1.clone()))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![d1.clone()]);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(
        uhubctl(&bench.host),
        vec!["uhubctl -l 1-1 -p 1 -a off", "uhubctl -l 1-1 -p 1 -a on"]
    );

    let state = bench.fleet.state(&d1).unwrap();
    assert!(state.connected);
    assert!(state.initialized);
    assert_eq!(state.mode(), Mode::None);
    assert_eq!(bench.shell.connect_count(&d1), 2);
    assert_eq!(bench.fleet.relay_state().await, [false, false, false]);
}

#[tokio::test]
async fn test_power_cycle_needs_port() {
    let bench = bench_with(vec![DeviceDescriptor::new("d1", "d1.local")]);
    let d1 = id("d1");

    let err = bench
        .fleet
        .restart_power(PowerTarget::Device(d1.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::PowerCycleFailure(_)));
    assert!(bench.fleet.state(&d1).unwrap().error.is_some());
    assert!(uhubctl(&bench.host).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_hub_command_is_power_cycle_failure() {
    let bench = bench();
    bench.host.fail_matching("uhubctl");

    let err = bench
        .fleet
        .restart_power(PowerTarget::Fleet)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::PowerCycleFailure(_)));
    // Nothing is powered back on after the off step failed.
    assert_eq!(uhubctl(&bench.host), vec!["uhubctl -l 1-1 -a off"]);
}

#[tokio::test(start_paused = true)]
async fn test_fleet_power_cycle_reports_per_device() {
    let bench = bench();
    let (d1, d2) = (id("d1"), id("d2"));
    bench.fleet.bring_up().await;
    bench.shell.fail_connects(&d2, usize::MAX);

    let report = bench.fleet.restart_power(PowerTarget::Fleet).await.unwrap();

    assert_eq!(report.succeeded, vec![d1.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, d2);
    assert!(matches!(
        report.failed[0].1,
        FleetError::ConnectFailure { .. }
    ));
    assert_eq!(
        uhubctl(&bench.host),
        vec!["uhubctl -l 1-1 -a off", "uhubctl -l 1-1 -a on"]
    );

    assert!(bench.fleet.state(&d1).unwrap().initialized);
    let s2 = bench.fleet.state(&d2).unwrap();
    assert!(!s2.connected);
    assert!(!s2.initialized);
    assert!(s2.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_power_cycle_drops_relays() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();
    bench.fleet.set_mode(&d1, Mode::Wn).await.unwrap();
    assert_eq!(bench.host.line(17), Some(false));
    bench.shell.fail_connects(&d1, usize::MAX);

    let report = bench.fleet.restart_power(PowerTarget::Fleet).await.unwrap();
    assert_eq!(report.failed[0].0, d1);

    let state = bench.fleet.state(&d1).unwrap();
    assert_eq!(state.mode(), Mode::None);
    assert!(!state.tx_on());
    assert_eq!(bench.fleet.relay_state().await, [false, false, false]);
    assert_eq!(bench.host.line(17), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_failed_device_power_cycle_drops_relays() {
    let bench = bench();
    let d1 = id("d1");
    bench.fleet.init(&d1).await.unwrap();
    bench.fleet.set_mode(&d1, Mode::Qpsk).await.unwrap();
    bench.shell.fail_connects(&d1, usize::MAX);

    assert!(bench
        .fleet
        .restart_power(PowerTarget::Device(d1.clone()))
        .await
        .is_err());

    assert!(!bench.fleet.state(&d1).unwrap().tx_on());
    assert_eq!(bench.fleet.relay_state().await, [false, false, false]);
    assert_eq!(bench.host.line(17), Some(true));
}

#[tokio::test]
async fn test_fleet_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
sync_interval = 10

[relays]
chip = "gpiochip4"
lines = [5, 6, 13]

[[devices]]
id = "north"
address = "10.0.0.11"
relays = [0, 0, 1]

[[devices]]
id = "south"
address = "10.0.0.12:2222"
"#,
    )
    .unwrap();

    let config: ControllerConfig = rf_core::config::load_config(&path).unwrap();
    config.validate().unwrap();

    let shell = MockShell::with_attributes(&config.attributes);
    let host = MockHost::new();
    let fleet = Fleet::new(&config, Arc::new(shell.clone()), Arc::new(host.clone()));
    assert_eq!(fleet.device_ids(), &[id("north"), id("south")]);

    let report = fleet.bring_up().await;
    assert!(report.is_success());

    fleet.set_mode(&id("north"), Mode::Bpsk).await.unwrap();
    assert_eq!(fleet.relay_state().await, [false, false, true]);
    assert_eq!(host.line(13), Some(false));
    assert!(host
        .commands()
        .iter()
        .all(|c| c.starts_with("gpioset gpiochip4 ")));

    fleet.shutdown().await;
    assert!(fleet.states().iter().all(|(_, s)| !s.connected));
}
