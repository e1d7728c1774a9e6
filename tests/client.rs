mod common;

use common::*;
use futures_util::SinkExt;
use onkyo_eiscp::{
    Action, ClientConfig, Command, ConnectionState, DiscoveryConfig, EiscpClient, EiscpError, Field,
    Frame, HdmiOutput, InputSource, ListeningMode, Power, StateUpdate, VolumeResolution, Zone,
};
use std::time::Duration;
use tokio::time::timeout;

async fn connect(config: ClientConfig) -> (EiscpClient, Peer, tokio::net::TcpListener) {
    init_tracing();
    let (listener, port) = listen().await;
    let client = EiscpClient::connect(identity(port), config).await.unwrap();
    let peer = accept(&listener).await;
    (client, peer, listener)
}

#[tokio::test]
async fn test_power_on_confirmed_with_one_notification() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;
    let mut updates = client.subscribe();
    assert!(client.is_available());
    assert!(client.state(Zone::Main).is_unknown());

    let main = client.main();
    let call = tokio::spawn(async move { main.power_on().await });

    assert_eq!(next_message(&mut peer).await, "PWR01");
    report(&mut peer, "PWR01").await;

    let confirmation = call.await.unwrap().unwrap();
    assert_eq!(confirmation.zone, Zone::Main);
    assert_eq!(confirmation.field, Field::Power(Power::On));

    let state = client.state(Zone::Main);
    assert!(state.is_on());
    assert!(state.updated_at.is_some());

    match updates.try_recv().unwrap() {
        Some(StateUpdate::ZoneChanged { zone, field, state }) => {
            assert_eq!(zone, Zone::Main);
            assert_eq!(field, Field::Power(Power::On));
            assert!(state.is_on());
        }
        other => panic!("unexpected update: {:?}", other),
    }
    assert!(updates.try_recv().unwrap().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn test_cross_zone_confirmations_out_of_order() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let main = client.main();
    let volume = tokio::spawn(async move { main.set_volume(0x28).await });
    assert_eq!(next_message(&mut peer).await, "MVL28");

    let zone2 = client.zone(Zone::Zone2);
    let input = tokio::spawn(async move { zone2.select_input(InputSource::Fm).await });
    assert_eq!(next_message(&mut peer).await, "SLZ24");

    // Answered in reverse order
    report(&mut peer, "SLZ24").await;
    report(&mut peer, "MVL28").await;

    assert_eq!(input.await.unwrap().unwrap().field, Field::Input(InputSource::Fm));
    assert_eq!(volume.await.unwrap().unwrap().field, Field::Volume(0x28));
    assert_eq!(client.state(Zone::Main).volume, Some(0x28));
    assert_eq!(client.state(Zone::Zone2).input, Some(InputSource::Fm));
    assert!(client.state(Zone::Zone2).volume.is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn test_same_key_resolves_in_order() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let main = client.main();
    let first = tokio::spawn(async move { main.volume_up().await });
    assert_eq!(next_message(&mut peer).await, "MVLUP");

    let main = client.main();
    let second = tokio::spawn(async move { main.volume_up().await });
    assert_eq!(next_message(&mut peer).await, "MVLUP");

    report(&mut peer, "MVL15").await;
    report(&mut peer, "MVL16").await;

    assert_eq!(first.await.unwrap().unwrap().field, Field::Volume(0x15));
    assert_eq!(second.await.unwrap().unwrap().field, Field::Volume(0x16));
    assert_eq!(client.state(Zone::Main).volume, Some(0x16));

    client.shutdown().await;
}

#[tokio::test]
async fn test_timeout_does_not_disturb_other_requests() {
    let config = ClientConfig {
        request_timeout_ms: 300,
        ..scripted_config()
    };
    let (client, mut peer, _listener) = connect(config).await;
    let mut updates = client.subscribe();

    let main = client.main();
    let ignored = tokio::spawn(async move { main.set_mute(true).await });
    assert_eq!(next_message(&mut peer).await, "AMT01");

    let zone2 = client.zone(Zone::Zone2);
    let answered = tokio::spawn(async move { zone2.power_off().await });
    assert_eq!(next_message(&mut peer).await, "ZPW00");
    report(&mut peer, "ZPW00").await;

    assert_eq!(answered.await.unwrap().unwrap().field, Field::Power(Power::Standby));

    let err = ignored.await.unwrap().unwrap_err();
    assert!(matches!(err, EiscpError::Timeout));
    assert!(err.is_outcome_unknown());
    // No optimistic update
    assert!(client.state(Zone::Main).muted.is_none());

    // Zone2 change notification
    assert!(matches!(updates.recv().await.unwrap(), StateUpdate::ZoneChanged { zone: Zone::Zone2, .. }));

    // A late answer is treated as a push
    report(&mut peer, "AMT01").await;
    let update = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
    assert!(matches!(update, StateUpdate::ZoneChanged { zone: Zone::Main, field: Field::Mute(true), .. }));
    assert_eq!(client.state(Zone::Main).muted, Some(true));

    client.shutdown().await;
}

#[tokio::test]
async fn test_not_available_is_rejected() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let call = {
        let client_zone = client.zone(Zone::Zone2);
        tokio::spawn(async move { client_zone.volume_down().await })
    };
    assert_eq!(next_message(&mut peer).await, "ZVLDOWN");
    report(&mut peer, "ZVLN/A").await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, EiscpError::Rejected { zone: Zone::Zone2, .. }));
    assert!(!err.is_outcome_unknown());

    client.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_operation_fails_locally() {
    let (client, _peer, _listener) = connect(scripted_config()).await;

    let err = client
        .zone(Zone::Zone2)
        .select_listening_mode(onkyo_eiscp::ListeningMode::Stereo)
        .await
        .unwrap_err();
    assert!(matches!(err, EiscpError::UnsupportedOperation { zone: Zone::Zone2, .. }));

    let err = client.main().set_volume(0xC9).await.unwrap_err();
    assert!(matches!(err, EiscpError::InvalidArgument(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_unsolicited_reports_update_state() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;
    let mut updates = client.subscribe();

    report(&mut peer, "SLI12").await;
    report(&mut peer, "LMD0C").await;
    // Not part of the tracked state
    report(&mut peer, "NLTF300000000000").await;
    report(&mut peer, "PWR01").await;

    for _ in 0..3 {
        let update = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
        assert!(matches!(update, StateUpdate::ZoneChanged { zone: Zone::Main, .. }));
    }

    let state = client.state(Zone::Main);
    assert_eq!(state.input, Some(InputSource::Tv));
    assert_eq!(state.listening_mode.as_ref().map(|m| m.code().to_string()), Some("0C".to_string()));
    assert!(state.is_on());
    assert!(client.status().last_seen.is_some());

    client.shutdown().await;
}

#[tokio::test]
async fn test_malformed_input_code_is_never_written() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let err = client
        .main()
        .select_input(InputSource::Other("01\rPWR00".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, EiscpError::InvalidArgument(_)));

    // The next frame on the wire is the next command, nothing smuggled before it
    let main = client.main();
    let call = tokio::spawn(async move { main.select_input(InputSource::Other("fe".to_string())).await });
    assert_eq!(next_message(&mut peer).await, "SLIFE");
    report(&mut peer, "SLIFE").await;
    assert_eq!(
        call.await.unwrap().unwrap().field,
        Field::Input(InputSource::Other("FE".to_string()))
    );

    client.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_command_does_not_take_next_confirmation() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let abandoned = timeout(Duration::from_millis(20), client.main().volume_up()).await;
    assert!(abandoned.is_err());
    assert_eq!(next_message(&mut peer).await, "MVLUP");

    let main = client.main();
    let call = tokio::spawn(async move { main.set_volume(0x30).await });
    assert_eq!(next_message(&mut peer).await, "MVL30");
    report(&mut peer, "MVL30").await;

    assert_eq!(call.await.unwrap().unwrap().field, Field::Volume(0x30));
    assert_eq!(client.state(Zone::Main).volume, Some(0x30));

    client.shutdown().await;
}

#[tokio::test]
async fn test_presets_hdmi_output_and_signal_info() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let zone2 = client.zone(Zone::Zone2);
    let call = tokio::spawn(async move { zone2.select_preset(5).await });
    assert_eq!(next_message(&mut peer).await, "PRZ05");
    report(&mut peer, "PRZ05").await;
    call.await.unwrap().unwrap();
    assert_eq!(client.state(Zone::Zone2).preset, Some(5));
    assert!(client.main().select_preset(41).await.is_err());

    let main = client.main();
    let call = tokio::spawn(async move { main.select_hdmi_output(HdmiOutput::Both).await });
    assert_eq!(next_message(&mut peer).await, "HDO03");
    report(&mut peer, "HDO03").await;
    call.await.unwrap().unwrap();
    assert_eq!(client.state(Zone::Main).hdmi_output, Some(HdmiOutput::Both));

    let main = client.main();
    let call = tokio::spawn(async move { main.audio_info().await });
    assert_eq!(next_message(&mut peer).await, "IFAQSTN");
    report(&mut peer, "IFAHDMI 1,PCM,48 kHz,2.0 ch,Stereo,2.0 ch,").await;
    let info = call.await.unwrap().unwrap();
    assert_eq!(info.format.as_deref(), Some("PCM"));
    assert_eq!(client.state(Zone::Main).audio_info, Some(info));

    // Signal changes are pushed without a query
    report(&mut peer, "IFVHDMI 1,3840 x 2160p 24 Hz,YCbCr,10bit,HDMI Main,3840 x 2160p 24 Hz,YCbCr,10bit,Direct,").await;
    wait_for(|| client.state(Zone::Main).video_info.is_some()).await;
    let video = client.state(Zone::Main).video_info.unwrap();
    assert_eq!(video.output_port.as_deref(), Some("HDMI Main"));
    assert_eq!(video.picture_mode.as_deref(), Some("Direct"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_select_by_configured_name() {
    let config = ClientConfig {
        source_names: [("10".to_string(), "Blu-ray".to_string())].into_iter().collect(),
        listening_mode_names: [("11".to_string(), "Hi-Fi".to_string())].into_iter().collect(),
        ..scripted_config()
    };
    let (client, peer, _listener) = connect(config).await;
    let _server = serve(peer, &[]);

    client.main().select_input_by_name("Blu-ray").await.unwrap();
    assert_eq!(client.main().input_name().as_deref(), Some("Blu-ray"));
    client.main().select_input_by_name("TV").await.unwrap();
    assert_eq!(client.main().input_name().as_deref(), Some("TV"));

    client.main().select_listening_mode_by_name("Hi-Fi").await.unwrap();
    assert_eq!(client.state(Zone::Main).listening_mode, Some(ListeningMode::PureAudio));
    assert_eq!(client.main().listening_mode_name().as_deref(), Some("Hi-Fi"));

    let err = client.main().select_input_by_name("Turntable").await.unwrap_err();
    assert!(matches!(err, EiscpError::InvalidArgument(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_volume_level_scaling() {
    let config = ClientConfig {
        max_volume: 50.0,
        volume_resolution: VolumeResolution::try_from(80u16).unwrap(),
        ..scripted_config()
    };
    let (client, mut peer, _listener) = connect(config).await;

    let main = client.main();
    let call = tokio::spawn(async move { main.set_volume_level(0.5).await });
    // 0.5 * 80 * 50% = 20 = 0x14
    assert_eq!(next_message(&mut peer).await, "MVL14");
    report(&mut peer, "MVL14").await;
    call.await.unwrap().unwrap();

    let level = client.main().volume_level().unwrap();
    assert!((level - 0.5).abs() < 1e-9);
    assert!(client.main().set_volume_level(1.5).await.is_err());

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_pending_and_disconnects() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    let main = client.main();
    let call = tokio::spawn(async move { main.toggle_mute().await });
    assert_eq!(next_message(&mut peer).await, "AMTTG");

    client.shutdown().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, EiscpError::ConnectionLost));
    assert!(err.is_outcome_unknown());

    assert!(!client.is_available());
    assert_eq!(client.status().state, ConnectionState::Disconnected);

    let err = client
        .issue(Command::new(Zone::Main, Action::QueryPower))
        .await
        .unwrap_err();
    assert!(matches!(err, EiscpError::NotConnected));

    // Shutdown is idempotent
    client.shutdown().await;
}

#[tokio::test]
async fn test_connection_lost_fails_pending_and_resets_state() {
    let (client, mut peer, listener) = connect(scripted_config()).await;
    let mut updates = client.subscribe();

    report(&mut peer, "PWR01").await;
    let _ = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
    assert!(client.state(Zone::Main).is_on());

    let main = client.main();
    let call = tokio::spawn(async move { main.input_up().await });
    assert_eq!(next_message(&mut peer).await, "SLIUP");
    drop(peer);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, EiscpError::ConnectionLost));

    let update = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
    assert_eq!(update, StateUpdate::ZonesReset);
    assert!(client.state(Zone::Main).is_unknown());

    // Comes back on its own
    let _peer = accept(&listener).await;
    wait_for(|| client.is_available()).await;
    assert_eq!(client.status().attempt, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_repopulates_state() {
    let config = ClientConfig {
        refresh_on_connect: true,
        ..scripted_config()
    };
    let (client, peer, listener) = connect(config).await;
    let mut updates = client.subscribe();

    let server = serve(peer, &[("PWR", "01"), ("MVL", "20"), ("AMT", "00"), ("SLI", "12"), ("LMD", "00"), ("ZPW", "00")]);
    // Zone2 is queried after every main zone field
    wait_for(|| client.state(Zone::Zone2).power.is_some()).await;
    assert!(client.state(Zone::Main).is_on());
    assert_eq!(client.state(Zone::Main).volume, Some(0x20));
    assert_eq!(client.state(Zone::Zone2).power, Some(Power::Standby));

    // Drop the session
    server.abort();
    loop {
        let update = timeout(Duration::from_secs(2), updates.recv()).await.unwrap().unwrap();
        if update == StateUpdate::ZonesReset {
            break;
        }
    }
    assert!(client.state(Zone::Main).is_unknown());
    assert!(client.state(Zone::Zone2).is_unknown());

    let peer = accept(&listener).await;
    let _server = serve(peer, &[("PWR", "00"), ("ZPW", "01"), ("ZVL", "10")]);
    wait_for(|| client.state(Zone::Zone2).volume.is_some()).await;

    assert_eq!(client.state(Zone::Main).power, Some(Power::Standby));
    assert!(client.state(Zone::Zone2).is_on());
    assert_eq!(client.state(Zone::Zone2).volume, Some(0x10));

    client.shutdown().await;
}

#[tokio::test]
async fn test_zone_refresh_skips_unanswered_fields() {
    let (client, peer, _listener) = connect(scripted_config()).await;
    let _server = serve(peer, &[("ZPW", "01"), ("SLZ", "2B")]);

    let state = client.zone(Zone::Zone2).refresh().await.unwrap();
    assert!(state.is_on());
    assert_eq!(state.input, Some(InputSource::from_code("2B")));
    assert!(state.volume.is_none());
    assert!(state.muted.is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn test_raw_send() {
    let (client, mut peer, _listener) = connect(scripted_config()).await;

    client.send(Frame::new("NRIQSTN")).await.unwrap();
    assert_eq!(next_message(&mut peer).await, "NRIQSTN");

    client.shutdown().await;
    assert!(matches!(client.send(Frame::new("NRIQSTN")).await, Err(EiscpError::NotConnected)));
}

#[tokio::test]
async fn test_connect_refused() {
    init_tracing();
    let (listener, port) = listen().await;
    drop(listener);

    let result = EiscpClient::connect(identity(port), scripted_config()).await;
    assert!(matches!(result, Err(EiscpError::Connect { .. })));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = ClientConfig {
        poll_interval_secs: Some(1),
        ..ClientConfig::default()
    };
    let result = EiscpClient::connect(identity(1), config).await;
    assert!(matches!(result, Err(EiscpError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_from_config_probes_host_and_applies_model_override() {
    init_tracing();
    let (listener, tcp_port) = listen().await;
    let (udp_addr, _responder) = udp_responder("TX-NR686", MAC, tcp_port).await;

    let config = ClientConfig {
        host: Some("127.0.0.1".to_string()),
        port: udp_addr.port(),
        model: Some("TX-RZ50".to_string()),
        discovery_timeout_ms: 2_000,
        ..scripted_config()
    };
    let client = EiscpClient::from_config(config).await.unwrap();
    let mut peer = accept(&listener).await;

    assert_eq!(client.identity().mac, mac(MAC));
    assert_eq!(client.identity().port, tcp_port);
    assert_eq!(client.identity().model, "TX-RZ50");
    assert_eq!(client.zones(), vec![Zone::Main, Zone::Zone2, Zone::Zone3]);

    let zone3 = client.zone(Zone::Zone3);
    let call = tokio::spawn(async move { zone3.power_on().await });
    assert_eq!(next_message(&mut peer).await, "PW301");
    peer.send(Frame::new("PW301")).await.unwrap();
    assert_eq!(call.await.unwrap().unwrap().field, Field::Power(Power::On));

    client.shutdown().await;
}

#[tokio::test]
async fn test_from_config_requires_host() {
    let result = EiscpClient::from_config(ClientConfig::default()).await;
    assert!(matches!(result, Err(EiscpError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_follows_receiver_to_new_address() {
    init_tracing();
    let (old_listener, old_port) = listen().await;
    let (new_listener, new_port) = listen().await;
    let (udp_addr, _responder) = udp_responder("TX-NR686", MAC, new_port).await;

    let config = ClientConfig {
        rediscover_after: 1,
        discovery_timeout_ms: 500,
        discovery: DiscoveryConfig {
            target: udp_addr,
            pioneer: false,
        },
        ..scripted_config()
    };
    let client = EiscpClient::connect(identity(old_port), config).await.unwrap();
    let old_peer = accept(&old_listener).await;

    // The receiver moves
    drop(old_peer);
    drop(old_listener);

    let mut peer = accept(&new_listener).await;
    wait_for(|| client.is_available()).await;

    let main = client.main();
    let call = tokio::spawn(async move { main.power_on().await });
    assert_eq!(next_message(&mut peer).await, "PWR01");
    report(&mut peer, "PWR01").await;
    call.await.unwrap().unwrap();

    client.shutdown().await;
}
