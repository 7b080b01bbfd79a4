//! Attach/detach lifecycle of the device registry on a simulated bus.

mod common;

use common::{attach, frame, identity, pad_interface, rig, rig_with, wired, WAIT};
use redgear_hid::{
    AttachError, CancelMode, DecodeError, DetachError, DeviceHandle, DispatchMode, DriverConfig,
    TransferError, TransferState, TransferStatus, PROTOCOL_WIRELESS,
};

#[test]
fn test_wired_and_wireless_pads_are_claimed() {
    let rig = rig(DispatchMode::Deferred);
    let a = rig
        .registry
        .on_attach(DeviceHandle(1), wired(), &pad_interface(1))
        .unwrap();
    let b = rig
        .registry
        .on_attach(DeviceHandle(2), identity(PROTOCOL_WIRELESS), &pad_interface(1))
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(rig.registry.handles(), vec![DeviceHandle(1), DeviceHandle(2)]);

    let wireless = rig.registry.session(DeviceHandle(2)).unwrap();
    assert_eq!(wireless.id, b);
    assert_eq!(wireless.display_name, "RedGear Wireless Gamepad");
    assert_eq!(wireless.identity.protocol_variant, PROTOCOL_WIRELESS);
}

#[test]
fn test_unsupported_devices_are_declined() {
    let rig = rig(DispatchMode::Deferred);
    let mut other = wired();
    other.product_id = 0x02EA;
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), other, &pad_interface(1)),
        Err(AttachError::NotSupported {
            vendor_id: 0x045E,
            product_id: 0x02EA,
            protocol_variant: 1
        })
    );
    // Headset interface of the same pad.
    assert!(matches!(
        rig.registry
            .on_attach(DeviceHandle(1), identity(2), &pad_interface(1)),
        Err(AttachError::NotSupported { .. })
    ));
    assert_eq!(rig.registry.session_count(), 0);
    assert_eq!(rig.bus.live_requests(), 0);
}

#[test]
fn test_topology_must_have_exactly_one_interrupt_in() {
    let rig = rig(DispatchMode::Deferred);
    for count in [0u8, 2, 3] {
        let result = rig
            .registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(count));
        assert_eq!(
            result,
            Err(AttachError::UnsupportedTopology {
                found: count as usize
            })
        );
        assert_eq!(rig.registry.session_count(), 0);
        assert!(rig.registry.session(DeviceHandle(1)).is_none());
    }
    assert_eq!(rig.bus.live_requests(), 0);
    assert_eq!(rig.bus.mapped_buffers(), 0);
}

#[test]
fn test_axis_reporting_is_refused() {
    let rig = rig_with(DriverConfig {
        report_axes: true,
        ..DriverConfig::default()
    });
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(1)),
        Err(AttachError::Decoder(DecodeError::AxisLayoutUnspecified))
    );
    assert_eq!(rig.bus.live_requests(), 0);
}

#[test]
fn test_resource_failures_roll_back() {
    let rig = rig(DispatchMode::Deferred);

    rig.bus.fail_next_request_alloc();
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(1)),
        Err(AttachError::ResourceExhausted)
    );

    rig.bus.fail_next_buffer_map();
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(1)),
        Err(AttachError::ResourceExhausted)
    );

    rig.bus.reject_next_submits(DeviceHandle(1), 1);
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(1)),
        Err(AttachError::SubmitFailed(TransferError::QueueRejected))
    );

    assert_eq!(rig.registry.session_count(), 0);
    assert_eq!(rig.bus.live_requests(), 0);
    assert_eq!(rig.bus.mapped_buffers(), 0);
    assert_eq!(rig.bus.invalid_releases(), 0);

    // The device can still be claimed once the bus recovers.
    attach(&rig, 1);
    assert_eq!(rig.bus.submissions(DeviceHandle(1)), 1);
}

#[test]
fn test_second_claim_of_a_handle_is_refused() {
    let rig = rig(DispatchMode::Deferred);
    let first = attach(&rig, 1);
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(1), wired(), &pad_interface(1)),
        Err(AttachError::AlreadyClaimed(DeviceHandle(1)))
    );
    assert_eq!(rig.registry.session(DeviceHandle(1)).unwrap().id, first);
    assert_eq!(rig.bus.submissions(DeviceHandle(1)), 1);
    assert_eq!(rig.bus.mapped_buffers(), 1);
    assert_eq!(rig.bus.live_requests(), 1);
}

#[test]
fn test_session_limit() {
    let rig = rig_with(DriverConfig {
        max_sessions: 2,
        ..DriverConfig::default()
    });
    attach(&rig, 1);
    attach(&rig, 2);
    assert_eq!(
        rig.registry
            .on_attach(DeviceHandle(3), wired(), &pad_interface(1)),
        Err(AttachError::ResourceExhausted)
    );
    assert_eq!(rig.bus.live_requests(), 2);

    rig.registry.on_detach(DeviceHandle(1)).unwrap();
    attach(&rig, 3);
}

#[test]
fn test_detach_releases_everything() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    rig.registry.on_detach(DeviceHandle(1)).unwrap();

    assert_eq!(rig.registry.session_count(), 0);
    assert!(!rig.bus.is_pending(DeviceHandle(1)));
    assert_eq!(rig.bus.mapped_buffers(), 0);
    assert_eq!(rig.bus.live_requests(), 0);
}

#[test]
fn test_double_detach_is_harmless() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    assert_eq!(rig.registry.on_detach(DeviceHandle(1)), Ok(()));
    assert_eq!(rig.registry.on_detach(DeviceHandle(1)), Ok(()));
    assert_eq!(rig.bus.invalid_releases(), 0);
    assert_eq!(rig.bus.mapped_buffers(), 0);
}

#[test]
fn test_detach_of_unknown_handle() {
    let rig = rig(DispatchMode::Deferred);
    assert_eq!(
        rig.registry.on_detach(DeviceHandle(42)),
        Err(DetachError::UnknownDevice(DeviceHandle(42)))
    );
}

#[test]
fn test_reattach_after_detach() {
    let rig = rig(DispatchMode::Deferred);
    let first = attach(&rig, 1);
    rig.registry.on_detach(DeviceHandle(1)).unwrap();
    let second = attach(&rig, 1);
    assert_ne!(first, second);
    assert_eq!(rig.registry.session_count(), 1);
}

#[test]
fn test_transient_then_rejected_retry_tears_down_one_session() {
    let rig = rig(DispatchMode::Deferred);
    let doomed = DeviceHandle(1);
    let healthy = DeviceHandle(2);
    attach(&rig, 1);
    let survivor = attach(&rig, 2);

    rig.bus.reject_next_submits(doomed, 1);
    rig.bus.complete(doomed, TransferStatus::Other(-71), &[]);
    assert_eq!(
        rig.registry.session(doomed).map(|s| s.state),
        Some(TransferState::Cancelled)
    );

    assert_eq!(rig.registry.reap(), 1);
    assert_eq!(rig.registry.handles(), vec![healthy]);
    assert_eq!(rig.bus.live_requests(), 1);
    assert_eq!(rig.bus.mapped_buffers(), 1);

    // The other pad keeps streaming.
    rig.bus
        .deliver_report(healthy, &frame(&[0x00, 0x14, 0x00, 0x10]));
    let (from, _) = rig.events.recv_timeout(WAIT).expect("event");
    assert_eq!(from, survivor);
    assert_eq!(rig.bus.submissions(healthy), 2);

    // The bus still sends the detach for the failed device later.
    assert_eq!(rig.registry.on_detach(doomed), Ok(()));
    assert_eq!(rig.bus.invalid_releases(), 0);
}

#[test]
fn test_failed_sessions_are_reaped_on_next_attach() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    rig.bus.reject_next_submits(DeviceHandle(1), 1);
    rig.bus.complete(DeviceHandle(1), TransferStatus::Other(-32), &[]);

    attach(&rig, 2);
    assert_eq!(rig.registry.handles(), vec![DeviceHandle(2)]);
}

#[test]
fn test_unplug_stops_the_loop_and_detach_cleans_up() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    assert!(rig.bus.unplug(DeviceHandle(1)));
    assert_eq!(
        rig.registry.session(DeviceHandle(1)).map(|s| s.state),
        Some(TransferState::Cancelled)
    );
    rig.registry.on_detach(DeviceHandle(1)).unwrap();
    assert_eq!(rig.bus.mapped_buffers(), 0);
}

#[test]
fn test_cancel_timeout_quarantines_the_buffer() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    attach(&rig, 2);
    rig.bus.set_cancel_mode(CancelMode::Ignore);

    assert_eq!(
        rig.registry.on_detach(DeviceHandle(1)),
        Err(DetachError::CancelTimeout(DeviceHandle(1)))
    );
    assert_eq!(rig.registry.session_count(), 1);
    assert_eq!(rig.registry.quarantined(), 1);
    // Still referenced by the outstanding request: never unmapped.
    assert_eq!(rig.bus.mapped_buffers(), 2);
    assert_eq!(rig.registry.on_detach(DeviceHandle(1)), Ok(()));
    assert_eq!(rig.bus.invalid_releases(), 0);
}

#[test]
fn test_concurrent_attach_and_detach_of_different_devices() {
    let rig = rig(DispatchMode::Deferred);
    std::thread::scope(|s| {
        for h in 1..=4u64 {
            let rig = &rig;
            s.spawn(move || {
                for _ in 0..5 {
                    attach(rig, h);
                    rig.bus
                        .deliver_report(DeviceHandle(h), &frame(&[0x00, 0x14, 0x10, 0x00]));
                    rig.registry.on_detach(DeviceHandle(h)).unwrap();
                }
            });
        }
    });
    assert_eq!(rig.registry.session_count(), 0);
    assert_eq!(rig.bus.mapped_buffers(), 0);
    assert_eq!(rig.bus.live_requests(), 0);
    assert_eq!(rig.bus.invalid_releases(), 0);
}

#[test]
fn test_device_path() {
    let rig = rig(DispatchMode::Deferred);
    rig.bus
        .set_device_path(DeviceHandle(2), "/dev/hidraw3");
    attach(&rig, 1);
    attach(&rig, 2);
    assert_eq!(
        rig.registry.session(DeviceHandle(1)).unwrap().path,
        "usb-1/input0"
    );
    assert_eq!(
        rig.registry.session(DeviceHandle(2)).unwrap().path,
        "/dev/hidraw3"
    );
}

#[test]
fn test_dropping_the_registry_detaches_live_sessions() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    attach(&rig, 2);
    let bus = rig.bus.clone();
    drop(rig);
    assert_eq!(bus.mapped_buffers(), 0);
    assert_eq!(bus.live_requests(), 0);
}

#[test]
fn test_detach_racing_reap_waits_for_the_teardown() {
    let rig = rig(DispatchMode::Deferred);
    let pad = DeviceHandle(1);
    for _ in 0..300 {
        attach(&rig, 1);
        rig.bus.reject_next_submits(pad, 1);
        rig.bus.complete(pad, TransferStatus::Other(-71), &[]);

        let detached = std::thread::scope(|s| {
            let reaper = s.spawn(|| rig.registry.reap());
            let detached = rig.registry.on_detach(pad);
            // Whichever side won, the buffer is gone once detach returns.
            let released = (rig.bus.mapped_buffers(), rig.bus.live_requests());
            assert!(reaper.join().unwrap() <= 1);
            (detached, released)
        });
        assert_eq!(detached, (Ok(()), (0, 0)));
        assert_eq!(rig.registry.session_count(), 0);
    }
    assert_eq!(rig.bus.invalid_releases(), 0);
    assert_eq!(rig.registry.quarantined(), 0);
}

#[test]
fn test_tombstones_are_bounded() {
    let rig = rig_with(DriverConfig {
        retired_capacity: 2,
        ..DriverConfig::default()
    });
    for h in 1..=3u64 {
        attach(&rig, h);
        rig.registry.on_detach(DeviceHandle(h)).unwrap();
    }
    assert_eq!(rig.registry.tombstones(), 2);
    // Oldest forgotten first.
    assert_eq!(
        rig.registry.on_detach(DeviceHandle(1)),
        Err(DetachError::UnknownDevice(DeviceHandle(1)))
    );
    assert_eq!(rig.registry.on_detach(DeviceHandle(3)), Ok(()));
}

#[test]
fn test_forget_drops_only_tombstones() {
    let rig = rig(DispatchMode::Deferred);
    attach(&rig, 1);
    attach(&rig, 2);
    rig.registry.on_detach(DeviceHandle(1)).unwrap();

    rig.registry.forget(DeviceHandle(1));
    rig.registry.forget(DeviceHandle(2));
    assert_eq!(rig.registry.tombstones(), 0);
    assert_eq!(rig.registry.handles(), vec![DeviceHandle(2)]);
    assert_eq!(
        rig.registry.on_detach(DeviceHandle(1)),
        Err(DetachError::UnknownDevice(DeviceHandle(1)))
    );

    // Reattaching a remembered handle clears its tombstone.
    rig.registry.on_detach(DeviceHandle(2)).unwrap();
    assert_eq!(rig.registry.tombstones(), 1);
    attach(&rig, 2);
    assert_eq!(rig.registry.tombstones(), 0);
}
