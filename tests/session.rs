//! End-to-end sessions against the simulator over loopback TCP.

use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use callbox::simulator::{self, Simulator};
use callbox::transport::Transport;
use callbox::{
    BtsBandwidth, BtsNumber, BtsTechnology, CallState, CallboxConfig, CallboxError,
    LifecycleConfig, Md8475a, SimulationAppState, SimulationProfile, TcpTransport,
    TriggerMessageIDs, TriggerMessageReply, VirtualPhoneStatus,
};

fn fast_lifecycle() -> LifecycleConfig {
    let tick = Duration::from_millis(5);
    let bound = Duration::from_secs(2);
    LifecycleConfig {
        app_command_timeout: bound,
        launch_timeout: bound,
        launch_poll_interval: tick,
        start_timeout: bound,
        start_poll_interval: tick,
        reset_timeout: bound,
        reset_poll_interval: tick,
        registration_timeout: bound,
        registration_poll_interval: tick,
    }
}

fn config_for(port: u16) -> CallboxConfig {
    CallboxConfig {
        address: "127.0.0.1".to_string(),
        port,
        connect_timeout: Duration::from_secs(2),
        query_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_secs(2),
        error_reporting: true,
        lifecycle: fast_lifecycle(),
    }
}

/// Starts a simulator on an ephemeral port.
fn start_simulator() -> (Arc<Mutex<Simulator>>, CallboxConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let simulator = Arc::new(Mutex::new(Simulator::new()));
    let shared = Arc::clone(&simulator);
    thread::spawn(move || simulator::serve(listener, &shared));
    (simulator, config_for(port))
}

#[test]
fn connect_performs_identification() {
    let (_simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();
    assert!(anritsu.is_connected());
    assert!(anritsu.identify().unwrap().starts_with("ANRITSU,MD8475A"));
}

#[test]
fn settings_round_trip_through_the_instrument() {
    let (_simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();

    let bts = anritsu.bts(BtsNumber::Bts2);
    bts.set_dl_bandwidth(BtsBandwidth::Bw10Mhz).unwrap();
    bts.set_output_level(-42.5).unwrap();
    assert_eq!(bts.dl_bandwidth().unwrap(), BtsBandwidth::Bw10Mhz);
    assert_eq!(bts.output_level().unwrap(), -42.5);

    let trigger = anritsu.trigger_message();
    trigger
        .set_reply_type(TriggerMessageIDs::AttachReq, TriggerMessageReply::Reject)
        .unwrap();
    assert_eq!(
        trigger.reply_type(TriggerMessageIDs::AttachReq).unwrap(),
        TriggerMessageReply::Reject
    );
}

#[test]
fn instrument_error_code_is_reported_and_session_survives() {
    let (simulator, config) = start_simulator();
    simulator.lock().unwrap().fail_command("OLVL", 131);
    let anritsu = Md8475a::connect(&config).unwrap();

    let err = anritsu.bts(BtsNumber::Bts1).set_output_level(10.0).unwrap_err();
    assert!(matches!(err, CallboxError::Instrument { code: 131, .. }));

    anritsu.bts(BtsNumber::Bts1).set_band(3).unwrap();
    assert_eq!(anritsu.bts(BtsNumber::Bts1).band().unwrap(), 3);
}

#[test]
fn unconfirmed_operation_is_incomplete() {
    let (simulator, config) = start_simulator();
    simulator.lock().unwrap().hold_operations(true);
    let anritsu = Md8475a::connect(&config).unwrap();
    assert!(matches!(
        anritsu.reset(),
        Err(CallboxError::IncompleteOperation { .. })
    ));
}

#[test]
fn full_bring_up_until_registration() {
    let (simulator, config) = start_simulator();
    simulator.lock().unwrap().register_after(Some(3));
    let anritsu = Md8475a::connect(&config).unwrap();

    assert_eq!(anritsu.smartstudio_status().unwrap(), SimulationAppState::NotExist);
    anritsu.launch().unwrap();
    assert_eq!(anritsu.smartstudio_status().unwrap(), SimulationAppState::NotRun);

    anritsu.set_simulation_model(&[BtsTechnology::Lte, BtsTechnology::Wcdma]).unwrap();
    anritsu.start_simulation().unwrap();
    anritsu.wait_for_ue_registration().unwrap();

    let status = anritsu.call_status().unwrap();
    assert_eq!(status.packet, CallState::Communication);
    let cell = anritsu.camping_cell().unwrap();
    assert_eq!(cell.bts, BtsNumber::Bts1);
    assert_eq!(cell.rat, BtsTechnology::Lte);
}

#[test]
fn reset_to_idle_moves_the_device() {
    let (_simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();
    anritsu.launch().unwrap();
    anritsu.set_simulation_model(&[BtsTechnology::Lte, BtsTechnology::Wcdma]).unwrap();
    anritsu.start_simulation().unwrap();

    anritsu.set_simulation_state_to_idle(BtsNumber::Bts2).unwrap();
    assert_eq!(anritsu.call_status().unwrap().voice, CallState::Idle);
    assert_eq!(anritsu.camping_cell().unwrap().rat, BtsTechnology::Wcdma);

    anritsu.set_simulation_state_to_poweroff().unwrap();
    assert_eq!(anritsu.call_status().unwrap().voice, CallState::PowerOff);
}

#[test]
fn stop_returns_once_the_simulation_is_idle() {
    let (simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();
    anritsu.launch().unwrap();
    anritsu.start_simulation().unwrap();

    anritsu.stop_simulation().unwrap();
    assert_eq!(simulator.lock().unwrap().app_state, SimulationAppState::NotRun);
    assert!(matches!(
        anritsu.stop_simulation(),
        Err(CallboxError::UnexpectedState { .. })
    ));
}

#[test]
fn smuggled_frames_are_refused_and_session_stays_in_step() {
    let (_simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();

    assert!(matches!(
        anritsu.save_sequence_log("log\"\0*IDN?\0x"),
        Err(CallboxError::InvalidValue(_))
    ));
    assert!(matches!(
        anritsu.query("STAT?\0*IDN?"),
        Err(CallboxError::InvalidValue(_))
    ));

    assert!(anritsu.identify().unwrap().starts_with("ANRITSU,MD8475A"));
    assert_eq!(anritsu.smartstudio_status().unwrap(), SimulationAppState::NotExist);
}

#[test]
fn registration_wait_times_out_without_a_device() {
    let (_simulator, mut config) = start_simulator();
    config.lifecycle.registration_timeout = Duration::from_millis(100);
    let anritsu = Md8475a::connect(&config).unwrap();
    anritsu.launch().unwrap();
    anritsu.start_simulation().unwrap();
    assert!(matches!(
        anritsu.wait_for_ue_registration(),
        Err(CallboxError::LifecycleTimeout { .. })
    ));
}

#[test]
fn fire_and_forget_commands_leave_no_stray_replies() {
    let (simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();
    anritsu.set_error_reporting(false);
    anritsu.virtual_phone().set_voice_off_hook().unwrap();
    anritsu.set_error_reporting(true);

    assert_eq!(
        anritsu.virtual_phone().status().unwrap(),
        VirtualPhoneStatus::VoiceCallInProgress
    );
    assert_eq!(simulator.lock().unwrap().property("VPSTAT", ""), Some("3"));
}

#[test]
fn profile_is_visible_on_the_instrument() {
    let (simulator, config) = start_simulator();
    let anritsu = Md8475a::connect(&config).unwrap();
    let profile = SimulationProfile::from_toml_str(
        r#"
model = ["LTE"]

[[bts]]
number = "BTS1"
dl_bandwidth = "5MHz"
mcc = "001"

[[pdn]]
number = 2
ue_ipv4 = "10.1.2.3"
"#,
    )
    .unwrap();
    anritsu.apply_profile(&profile).unwrap();

    let simulator = simulator.lock().unwrap();
    assert_eq!(simulator.property("DLBANDWIDTH", "BTS1"), Some("5MHz"));
    assert_eq!(simulator.property("MCC", "BTS1"), Some("001"));
    assert_eq!(simulator.property("PDNIPV4", "PDN2"), Some("10.1.2.3"));
}

#[test]
fn disconnect_releases_the_instrument_for_the_next_client() {
    let (_simulator, config) = start_simulator();
    let first = Md8475a::connect(&config).unwrap();
    first.disconnect().unwrap();
    assert!(matches!(first.identify(), Err(CallboxError::SessionClosed)));
    assert!(matches!(
        first.pdn(1).unwrap().ue_address_ipv4(),
        Err(CallboxError::SessionClosed)
    ));

    let second = Md8475a::connect(&config).unwrap();
    assert!(second.identify().is_ok());
}

/// A peer that accepts and reads but never answers.
fn silent_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            thread::spawn(move || {
                let mut sink = [0u8; 256];
                while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
            });
        }
    });
    port
}

#[test]
fn query_to_silent_peer_times_out_on_schedule() {
    let port = silent_listener();
    let mut transport =
        TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let result = transport.send_and_receive("STAT?", timeout);
    let waited = started.elapsed();

    assert!(matches!(result, Err(CallboxError::Timeout(t)) if t == timeout));
    assert!(waited >= timeout, "returned after {waited:?}");
    assert!(waited < Duration::from_secs(2), "returned after {waited:?}");
}

#[test]
fn silent_peer_fails_the_handshake() {
    let port = silent_listener();
    let mut config = config_for(port);
    config.connect_timeout = Duration::from_millis(200);
    assert!(matches!(
        Md8475a::connect(&config),
        Err(CallboxError::Connection { .. })
    ));
}

#[test]
fn nothing_listening_is_a_connection_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    assert!(matches!(
        Md8475a::connect(&config_for(port)),
        Err(CallboxError::Connection { .. })
    ));
}
