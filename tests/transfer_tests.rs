//! Transfer loop behaviour, driven through the registry on a simulated bus.

mod common;

use common::{attach, frame, rig, WAIT};
use redgear_hid::{
    Button, DeviceHandle, DispatchMode, InputEvent, TransferState, TransferStatus, REPORT_LEN,
};

const DEV: DeviceHandle = DeviceHandle(1);

fn state(rig: &common::Rig) -> Option<TransferState> {
    rig.registry.session(DEV).map(|s| s.state)
}

#[test]
fn test_attach_submits_one_interrupt_in() {
    let rig = rig(DispatchMode::Inline);
    attach(&rig, 1);

    assert_eq!(rig.bus.submissions(DEV), 1);
    assert!(rig.bus.is_pending(DEV));
    let transfer = rig.bus.last_transfer(DEV).unwrap();
    assert_eq!(transfer.endpoint, 0x81);
    assert_eq!(transfer.length, REPORT_LEN);
    assert_eq!(transfer.interval, 4);
    assert_eq!(state(&rig), Some(TransferState::Submitted));
}

#[test]
fn test_every_report_is_resubmitted() {
    let rig = rig(DispatchMode::Inline);
    let session = attach(&rig, 1);

    assert!(rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x10, 0x00])));
    assert!(rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x10, 0x00])));
    assert!(rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x00, 0x00])));

    assert_eq!(rig.bus.submissions(DEV), 4);
    assert_eq!(state(&rig), Some(TransferState::Submitted));

    // Inline dispatch reports on the completion path, so events are already there.
    let reports: Vec<_> = rig.events.try_iter().collect();
    assert_eq!(
        reports,
        vec![
            (
                session,
                vec![InputEvent::Button {
                    button: Button::Start,
                    pressed: true
                }]
            ),
            (
                session,
                vec![InputEvent::Button {
                    button: Button::Start,
                    pressed: false
                }]
            ),
        ]
    );
}

#[test]
fn test_deferred_dispatch_delivers_off_the_completion_path() {
    let rig = rig(DispatchMode::Deferred);
    let session = attach(&rig, 1);

    rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x00, 0x40]));
    let (from, events) = rig.events.recv_timeout(WAIT).expect("event");
    assert_eq!(from, session);
    assert_eq!(
        events,
        vec![InputEvent::Button {
            button: Button::X,
            pressed: true
        }]
    );
    assert_eq!(rig.bus.submissions(DEV), 2);
}

#[test]
fn test_non_standard_and_short_frames_still_resubmit() {
    let rig = rig(DispatchMode::Inline);
    attach(&rig, 1);

    rig.bus.deliver_report(DEV, &frame(&[0x01, 0x03, 0x06]));
    rig.bus.deliver_report(DEV, &[0x00, 0x14, 0xF0]);
    rig.bus.deliver_report(DEV, &frame(&[0x08, 0x14, 0xF0, 0xF0]));

    assert_eq!(rig.bus.submissions(DEV), 4);
    assert!(rig.events.try_recv().is_err());
}

#[test]
fn test_shutdown_statuses_stop_without_resubmit() {
    for status in [
        TransferStatus::ConnectionReset,
        TransferStatus::NoSuchDevice,
        TransferStatus::EndpointShutdown,
    ] {
        let rig = rig(DispatchMode::Deferred);
        attach(&rig, 1);

        assert!(rig.bus.complete(DEV, status, &[]));
        assert_eq!(state(&rig), Some(TransferState::Cancelled), "{}", status);
        assert_eq!(rig.bus.submissions(DEV), 1);
        assert!(!rig.bus.is_pending(DEV));
        // A stopped loop is not a failure; nothing to reap.
        assert_eq!(rig.registry.reap(), 0);

        rig.registry.on_detach(DEV).unwrap();
        assert_eq!(rig.bus.mapped_buffers(), 0);
        assert_eq!(rig.bus.live_requests(), 0);
    }
}

#[test]
fn test_status_codes_map_to_completion_classes() {
    assert_eq!(TransferStatus::from_code(0), TransferStatus::Ok);
    assert_eq!(
        TransferStatus::from_code(-104),
        TransferStatus::ConnectionReset
    );
    assert_eq!(TransferStatus::from_code(-19), TransferStatus::NoSuchDevice);
    assert_eq!(
        TransferStatus::from_code(-108),
        TransferStatus::EndpointShutdown
    );
    assert_eq!(TransferStatus::from_code(-71), TransferStatus::Other(-71));
    assert_eq!(TransferStatus::Other(-32).code(), -32);
}

#[test]
fn test_transient_error_is_retried_once() {
    let rig = rig(DispatchMode::Inline);
    attach(&rig, 1);

    rig.bus.complete(DEV, TransferStatus::Other(-71), &[]);
    assert_eq!(rig.bus.submissions(DEV), 2);
    assert_eq!(state(&rig), Some(TransferState::Submitted));

    // The retry worked, so the loop carries on normally.
    rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x00, 0x80]));
    assert_eq!(rig.bus.submissions(DEV), 3);
    assert_eq!(rig.events.try_iter().count(), 1);
}

#[test]
fn test_rejected_resubmit_after_report_stops_the_loop() {
    let rig = rig(DispatchMode::Inline);
    attach(&rig, 1);

    rig.bus.reject_next_submits(DEV, 1);
    rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x10, 0x00]));

    // The report itself still made it out.
    assert_eq!(rig.events.try_iter().count(), 1);
    assert_eq!(state(&rig), Some(TransferState::Cancelled));
    assert_eq!(rig.registry.reap(), 1);
    assert_eq!(rig.registry.session_count(), 0);
    assert_eq!(rig.bus.mapped_buffers(), 0);
}

#[test]
fn test_completion_after_cancel_is_terminal() {
    let rig = rig(DispatchMode::Inline);
    attach(&rig, 1);
    rig.bus.set_cancel_mode(redgear_hid::CancelMode::Ignore);

    assert!(rig.registry.on_detach(DEV).is_err());
    // The bus finally reports; even a good report must not restart the loop.
    rig.bus.deliver_report(DEV, &frame(&[0x00, 0x14, 0x10, 0x00]));
    assert_eq!(rig.bus.submissions(DEV), 1);
    assert!(!rig.bus.is_pending(DEV));
    assert!(rig.events.try_recv().is_err());
}
