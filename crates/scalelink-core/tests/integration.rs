//! End-to-end tests over the mock transport.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::timeout;

use scalelink_core::{
    ConnectFailureReason, DiscoveryEvent, DriverRegistry, Error, InfoCode, LifecycleEvent,
    LifecycleReceiver, MockTransport, RetryPolicy, ScaleCentral, ScaleMeasurement,
    ScaleTransport, SessionState, TransportEvent,
};

const MIBCS_ADDR: &str = "FA:A0:F7:11:12:46";

fn central_over_mock() -> (Arc<MockTransport>, ScaleCentral, LifecycleReceiver) {
    let transport = Arc::new(MockTransport::new());
    let (central, events) =
        ScaleCentral::new(Arc::clone(&transport) as Arc<dyn ScaleTransport>);
    (transport, central, events)
}

async fn next_event(events: &mut LifecycleReceiver) -> LifecycleEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for lifecycle event")
        .expect("lifecycle stream ended")
}

async fn expect_no_event(events: &mut LifecycleReceiver) {
    let outcome = timeout(Duration::from_millis(50), events.recv()).await;
    assert!(outcome.is_err(), "unexpected event: {outcome:?}");
}

#[tokio::test]
async fn mibcs_end_to_end() {
    let (transport, central, mut events) = central_over_mock();
    transport.set_auto_handshake(false);

    // Scan: the scale advertises, an unsupported headset advertises too.
    central.start_discovery().await.unwrap();
    let mut discovery = central.discovery_events();
    transport.advertise(MIBCS_ADDR, Some("MIBCS"));
    transport.advertise("11:22:33:44:55:66", Some("JBL Flip 5"));
    transport.advertise(MIBCS_ADDR, Some("MIBCS"));

    let found = timeout(Duration::from_secs(1), discovery.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        found,
        DiscoveryEvent::DeviceFound {
            address: MIBCS_ADDR.into(),
            name: "MIBCS".into(),
            driver_id: "mibcs".into(),
        }
    );
    // The repeat advertisement and the headset produce nothing.
    assert!(
        timeout(Duration::from_millis(50), discovery.recv())
            .await
            .is_err()
    );
    assert_eq!(central.discovered_devices().len(), 1);
    central.stop_discovery().await;

    // Connect: link up, then the driver handshake.
    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );
    transport.emit_info(MIBCS_ADDR, InfoCode::StepOnScale, None);
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::InfoMessage {
            code: InfoCode::StepOnScale,
            arg: None,
        }
    );
    transport.complete_handshake(MIBCS_ADDR);
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Init);
    assert_eq!(central.state(), SessionState::Connected);

    // A reading arrives.
    transport.emit_measurement(MIBCS_ADDR, ScaleMeasurement::from_weight(72.4));
    match next_event(&mut events).await {
        LifecycleEvent::DataReady { measurement } => {
            assert!((measurement.weight - 72.4).abs() < 0.01);
        }
        other => panic!("expected DataReady, got {other:?}"),
    }

    // The scale powers off.
    transport.drop_link(MIBCS_ADDR);
    assert_eq!(next_event(&mut events).await, LifecycleEvent::ConnectionLost);
    assert_eq!(central.state(), SessionState::Idle);
}

#[tokio::test]
async fn retry_exhaustion_emits_no_device_found() {
    let (transport, central, mut events) = central_over_mock();
    transport.fail_connects(3);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionRetrying { attempt: 1 }
    );
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionRetrying { attempt: 2 }
    );
    assert_eq!(next_event(&mut events).await, LifecycleEvent::NoDeviceFound);

    expect_no_event(&mut events).await;
    assert_eq!(central.state(), SessionState::Idle);
    assert_eq!(transport.connect_attempts().len(), 3);

    // The controller is usable again after the terminal event.
    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );
}

#[tokio::test]
async fn second_connect_rejected_while_session_live() {
    let (transport, central, mut events) = central_over_mock();
    transport.set_auto_handshake(false);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();

    // Same address: no-op, no error, no extra attempt.
    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(transport.connect_attempts().len(), 1);

    // Different address: rejected synchronously.
    let err = central
        .connect("11:22:33:44:55:66", "mibcs")
        .await
        .unwrap_err();
    match err {
        Error::AlreadyConnecting { active, requested } => {
            assert_eq!(active, MIBCS_ADDR);
            assert_eq!(requested, "11:22:33:44:55:66");
        }
        other => panic!("expected AlreadyConnecting, got {other:?}"),
    }

    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );
}

#[tokio::test]
async fn invalid_address_rejected_synchronously() {
    let (_transport, central, mut events) = central_over_mock();

    assert!(matches!(
        central.connect("not-a-mac", "mibcs").await,
        Err(Error::InvalidAddress(_))
    ));
    assert!(matches!(
        central.connect("aa:bb:cc:dd:ee:ff", "mibcs").await,
        Err(Error::InvalidAddress(_))
    ));
    expect_no_event(&mut events).await;
    assert_eq!(central.state(), SessionState::Idle);
}

#[tokio::test]
async fn disabled_radio_rejects_connect() {
    let (transport, central, _events) = central_over_mock();
    transport.set_available(false);

    assert!(matches!(
        central.connect(MIBCS_ADDR, "mibcs").await,
        Err(Error::RadioDisabled)
    ));
}

#[tokio::test]
async fn measurements_before_init_are_dropped() {
    let (transport, central, mut events) = central_over_mock();
    transport.set_auto_handshake(false);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );

    // Still initializing: the reading must not surface.
    transport.emit_measurement(MIBCS_ADDR, ScaleMeasurement::from_weight(72.4));
    expect_no_event(&mut events).await;

    transport.complete_handshake(MIBCS_ADDR);
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Init);

    transport.emit_measurement(MIBCS_ADDR, ScaleMeasurement::from_weight(72.4));
    assert!(matches!(
        next_event(&mut events).await,
        LifecycleEvent::DataReady { .. }
    ));
}

#[tokio::test]
async fn disconnect_mid_retry_confirms_once() {
    // A long fixed backoff pins the session in Connecting between attempts,
    // so the teardown request deterministically lands mid-retry.
    let transport = Arc::new(MockTransport::new());
    let (central, mut events) = ScaleCentral::with_config(
        Arc::clone(&transport) as Arc<dyn ScaleTransport>,
        DriverRegistry::builtin(),
        RetryPolicy {
            max_attempts: 3,
            backoff: Some(Duration::from_secs(5)),
            jitter: false,
        },
    );
    transport.fail_connects(1);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionRetrying { attempt: 1 }
    );

    central.disconnect().await.unwrap();
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Disconnected);

    // Late events from the dead session are discarded.
    transport.inject(TransportEvent::Connected {
        address: MIBCS_ADDR.into(),
        token: 0,
    });
    transport.emit_measurement(MIBCS_ADDR, ScaleMeasurement::from_weight(72.4));
    expect_no_event(&mut events).await;
    assert_eq!(central.state(), SessionState::Idle);
}

#[tokio::test]
async fn stale_connect_failure_not_applied_to_new_session() {
    let (transport, central, mut events) = central_over_mock();
    transport.fail_connects(3);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionRetrying { attempt: 1 }
    );
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionRetrying { attempt: 2 }
    );
    assert_eq!(next_event(&mut events).await, LifecycleEvent::NoDeviceFound);

    // A leftover failure report from the dead session turns up late, for
    // the same address a fresh session is about to target.
    transport.inject(TransportEvent::ConnectFailed {
        address: MIBCS_ADDR.into(),
        token: 0,
        reason: ConnectFailureReason::Timeout,
    });

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    // The new session's own attempt succeeds; the stale failure must not
    // surface as a retry (or anything else) on the new session.
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Init);
    assert_eq!(central.state(), SessionState::Connected);
}

#[tokio::test]
async fn disconnect_while_connected() {
    let (transport, central, mut events) = central_over_mock();

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Init);

    central.disconnect().await.unwrap();
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Disconnected);
    expect_no_event(&mut events).await;

    // Disconnecting again while idle is a no-op.
    central.disconnect().await.unwrap();
    expect_no_event(&mut events).await;
}

#[tokio::test]
async fn handshake_failure_is_fatal() {
    let (transport, central, mut events) = central_over_mock();
    transport.set_auto_handshake(false);

    central.connect(MIBCS_ADDR, "mibcs").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::ConnectionEstablished
    );

    transport.fail_handshake(MIBCS_ADDR, "subscribe rejected");
    match next_event(&mut events).await {
        LifecycleEvent::UnexpectedError { detail } => {
            assert!(detail.contains("subscribe rejected"));
        }
        other => panic!("expected UnexpectedError, got {other:?}"),
    }
    assert_eq!(central.state(), SessionState::Idle);
}

#[tokio::test]
async fn scan_requires_available_transport() {
    let (transport, central, _events) = central_over_mock();
    transport.set_available(false);

    assert!(matches!(
        central.start_discovery().await,
        Err(Error::TransportUnavailable { .. })
    ));
}

#[tokio::test]
async fn rescan_clears_previous_devices() {
    let (transport, central, _events) = central_over_mock();
    let mut discovery = central.discovery_events();

    central.start_discovery().await.unwrap();
    transport.advertise(MIBCS_ADDR, Some("MIBCS"));
    timeout(Duration::from_secs(1), discovery.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(central.discovered_devices().len(), 1);
    central.stop_discovery().await;

    // A fresh scan starts from an empty set, so the same scale is reported
    // again.
    central.start_discovery().await.unwrap();
    assert!(central.discovered_devices().is_empty());
    transport.advertise(MIBCS_ADDR, Some("MIBCS"));
    let found = timeout(Duration::from_secs(1), discovery.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(found, DiscoveryEvent::DeviceFound { .. }));
}

proptest! {
    /// Matching is pure: the same name always resolves to the same driver.
    #[test]
    fn matcher_is_deterministic(name in ".{0,24}") {
        let registry = DriverRegistry::builtin();
        let first = registry.match_name(&name).map(|d| d.id);
        let second = registry.match_name(&name).map(|d| d.id);
        prop_assert_eq!(first, second);
    }

    /// Arbitrary advertisement sequences never produce duplicate reports.
    #[test]
    fn discovery_dedup_over_arbitrary_sequences(
        sequence in proptest::collection::vec((0u8..4, 0u8..4), 0..32)
    ) {
        let names = ["MIBCS", "MI_SCALE", "JBL Flip 5", ""];
        let addresses = [
            "FA:A0:F7:11:12:46",
            "AA:BB:CC:DD:EE:FF",
            "11:22:33:44:55:66",
            "00:11:22:33:44:55",
        ];

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (transport, central, _events) = central_over_mock();
            central.start_discovery().await.unwrap();
            for &(addr_idx, name_idx) in &sequence {
                let name = names[name_idx as usize];
                let name = (!name.is_empty()).then_some(name);
                transport.advertise(addresses[addr_idx as usize], name);
            }
            // Let the pump task drain the advertisement stream.
            for _ in 0..64 {
                tokio::task::yield_now().await;
            }

            let devices = central.discovered_devices();
            let mut seen = std::collections::HashSet::new();
            for device in &devices {
                prop_assert!(seen.insert(device.address.clone()), "duplicate report");
                prop_assert!(device.name == "MIBCS" || device.name == "MI_SCALE");
            }
            Ok(())
        })?;
    }
}
