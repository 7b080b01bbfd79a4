use redgear_hid::{DriverConfig, HidMonitor, InputEvent, Result, SessionId, PROTOCOL_WIRELESS};
use std::sync::Arc;
use std::{env, thread, time::Duration};

// Usage: monitor [config.toml] [--wireless]
fn main() -> Result<()> {
    env_logger::init();

    let mut config = DriverConfig::default();
    let mut wireless = false;
    for arg in env::args().skip(1) {
        if arg == "--wireless" {
            wireless = true;
        } else {
            println!("Loading configuration from {}", arg);
            config = DriverConfig::load(&arg)?;
        }
    }

    let sink = Arc::new(|session: SessionId, events: &[InputEvent]| {
        for event in events {
            println!("[{}] {}", session, event);
        }
    });

    let mut monitor = HidMonitor::new(sink, config)?;
    if wireless {
        monitor = monitor.with_protocol_variant(PROTOCOL_WIRELESS);
    }

    println!("Waiting for RedGear gamepads (Press Ctrl+C to stop)");
    loop {
        let report = monitor.scan()?;
        for handle in &report.attached {
            if let Some(summary) = monitor.registry().session(*handle) {
                println!(
                    "+ {} {} at {} ({})",
                    summary.id, summary.display_name, summary.path, summary.handle
                );
            }
        }
        for handle in &report.detached {
            println!("- {}", handle);
        }
        if report.reaped > 0 {
            println!("! {} session(s) stopped after transfer errors", report.reaped);
        }
        thread::sleep(Duration::from_millis(500));
    }
    // Note: Loop runs forever; the registry detaches everything when dropped
}
