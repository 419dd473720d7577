//! End-to-end bus scenarios through the assembled Core

use std::sync::Arc;

use parking_lot::Mutex;

use rtuscope::{Core, CoreConfig};
use rtuscope_bus::codec::crc16;
use rtuscope_bus::constants::{FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS};
use rtuscope_bus::testing::{ManualClock, ScriptedLink};
use rtuscope_bus::Clock;

fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut out = body.to_vec();
    let crc = crc16(body);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn build_core() -> (Arc<ManualClock>, ScriptedLink, Core) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let clock = ManualClock::new();
    let link = ScriptedLink::new(clock.clone());
    let core = Core::new(
        Box::new(link.clone()),
        clock.clone(),
        CoreConfig::default(),
    )
    .expect("core constructs");
    (clock, link, core)
}

fn spin(clock: &Arc<ManualClock>, core: &Core, steps: usize, step_us: u64) {
    for _ in 0..steps {
        core.tick();
        clock.advance_us(step_us);
    }
}

const METER_TYPE: &str = r#"{
    "name": "Meter",
    "registers": [
        {"name": "voltage", "address": 0, "length": 2, "functionCode": 3,
         "dataType": "float32_be", "unit": "V", "pollInterval": 100}
    ]
}"#;

// ============================================================================
// Scenario 1: happy read
// ============================================================================

#[test]
fn test_happy_read_decodes_float() {
    let (clock, link, core) = build_core();
    // Slave answers FC3 with F32BE 25.0: byte count 4, 0x41C8_0000
    link.set_responder(0, |request| {
        (request[1] == FC_READ_HOLDING_REGISTERS)
            .then(|| (2000, with_crc(&[0x01, 0x03, 0x04, 0x41, 0xC8, 0x00, 0x00])))
    });

    core.devices()
        .load_type(METER_TYPE.as_bytes())
        .expect("type loads");
    core.devices()
        .load_mapping(br#"{"devices": [{"unitId": 1, "type": "Meter", "name": "Main"}]}"#)
        .expect("mapping loads");

    let completion = Arc::new(Mutex::new(None));
    let completion_in = completion.clone();
    assert!(core.bus().enqueue_read(
        1,
        FC_READ_HOLDING_REGISTERS,
        0,
        2,
        Some(Box::new(move |success, frame| {
            *completion_in.lock() = Some((success, frame.byte_count()));
        })),
    ));

    spin(&clock, &core, 20, 5000);

    assert_eq!(*completion.lock(), Some((true, 4)));
    assert_eq!(core.devices().value(1, "voltage"), Some(25.0));
    assert_eq!(core.bus().stats().own_requests_success, 2);
}

// ============================================================================
// Scenario 2: exception response
// ============================================================================

#[test]
fn test_exception_marks_invalid_and_resets_backoff() {
    let (clock, link, core) = build_core();
    link.set_responder(0, |_| Some((2000, with_crc(&[0x01, 0x83, 0x02]))));

    core.devices()
        .load_type(METER_TYPE.as_bytes())
        .expect("type loads");
    core.devices()
        .load_mapping(br#"{"devices": [{"unitId": 1, "type": "Meter", "name": "Main"}]}"#)
        .expect("mapping loads");

    let completion = Arc::new(Mutex::new(None));
    let completion_in = completion.clone();
    core.bus().enqueue_read(
        1,
        FC_READ_HOLDING_REGISTERS,
        0,
        2,
        Some(Box::new(move |success, frame| {
            *completion_in.lock() = Some((success, frame.is_exception, frame.exception_code));
        })),
    );

    spin(&clock, &core, 20, 5000);

    assert_eq!(*completion.lock(), Some((false, true, 2)));
    assert_eq!(core.devices().value(1, "voltage"), None);
    let snapshot = core.devices().snapshot(1).expect("snapshot");
    assert!(snapshot.error_count >= 1);
    // A CRC-valid exception still proves the unit alive
    assert!(core.bus().unit_backoff_snapshot().is_empty());
    assert!(!core.bus().is_unit_paused(1));
}

// ============================================================================
// Scenario 3: timeout and back-off
// ============================================================================

#[test]
fn test_timeouts_pause_unit_but_not_neighbors() {
    let (clock, link, core) = build_core();

    let called = Arc::new(Mutex::new(0u32));
    for _ in 0..3 {
        let called_in = called.clone();
        core.bus().enqueue_read(
            1,
            FC_READ_HOLDING_REGISTERS,
            0,
            1,
            Some(Box::new(move |_, _| *called_in.lock() += 1)),
        );
        // Send, then cross the 1000ms response timeout
        spin(&clock, &core, 2, 5000);
        clock.advance_ms(1001);
        core.tick();
    }

    assert_eq!(*called.lock(), 0, "timeouts never reach completions");
    let backoff = core.bus().unit_backoff_snapshot();
    assert_eq!(backoff.len(), 1);
    assert_eq!(backoff[0].consecutive_timeouts, 3);
    assert!(backoff[0].paused);
    assert_eq!(backoff[0].backoff_ms, 4000);
    assert!(backoff[0].pause_remaining_ms <= 2000);

    // A different unit transmits within one silence window
    let before = link.transmitted_count();
    core.bus()
        .enqueue_read(2, FC_READ_HOLDING_REGISTERS, 0, 1, None);
    clock.advance_us(5000);
    core.tick();
    assert_eq!(link.transmitted_count(), before + 1);
    let sent = link.transmitted();
    assert_eq!(sent.last().map(|f| f[0]), Some(2));
}

// ============================================================================
// Scenario 4: multi-master echo
// ============================================================================

#[test]
fn test_tx_echo_discarded_real_response_accepted() {
    let (clock, link, core) = build_core();
    link.set_echo(100);
    link.set_responder(0, |request| {
        (request[1] == FC_READ_HOLDING_REGISTERS)
            .then(|| (6000, with_crc(&[0x01, 0x03, 0x02, 0x00, 0x2A])))
    });

    let completion = Arc::new(Mutex::new(None));
    let completion_in = completion.clone();
    core.bus().enqueue_read(
        1,
        FC_READ_HOLDING_REGISTERS,
        0,
        1,
        Some(Box::new(move |success, frame| {
            *completion_in.lock() = Some((success, frame.register_word(0)));
        })),
    );

    spin(&clock, &core, 20, 5000);

    assert_eq!(*completion.lock(), Some((true, Some(42))));
    let stats = core.bus().stats();
    assert_eq!(stats.other_requests_seen, 0, "echo is not foreign traffic");
    assert_eq!(stats.own_requests_success, 1);
    assert_eq!(stats.timeouts, 0);
}

// ============================================================================
// Scenario 5: passive observer
// ============================================================================

#[test]
fn test_passive_observation_fills_cache_and_devices() {
    let (clock, link, core) = build_core();
    core.devices()
        .load_type(
            br#"{
                "name": "Probe",
                "registers": [
                    {"name": "temp", "address": 32, "functionCode": 4,
                     "dataType": "uint16", "factor": 0.1, "unit": "C"}
                ]
            }"#,
        )
        .expect("type loads");
    core.devices()
        .load_mapping(br#"{"devices": [{"unitId": 2, "type": "Probe", "name": "Outdoor"}]}"#)
        .expect("mapping loads");

    // Foreign master: FC04 unit 2, start 0x20, qty 4
    let request = with_crc(&[0x02, 0x04, 0x00, 0x20, 0x00, 0x04]);
    let now = clock.uptime_us();
    link.feed_at(now + 100, &request, 100);
    spin(&clock, &core, 4, 5000);

    let response = with_crc(&[
        0x02, 0x04, 0x08, 0x00, 0xDD, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04,
    ]);
    let now = clock.uptime_us();
    link.feed_at(now + 100, &response, 100);
    spin(&clock, &core, 4, 5000);

    // Register cache has the whole span
    for (offset, expected) in [(0u16, 0x00DD), (1, 2), (2, 3), (3, 4)] {
        assert_eq!(
            core.bus()
                .cached_register(2, FC_READ_INPUT_REGISTERS, 0x20 + offset),
            Some(expected),
            "cache address 0x{:02X}",
            0x20 + offset
        );
    }
    // Defined registers decoded into the device
    assert_eq!(core.devices().value(2, "temp"), Some(22.1));
    assert_eq!(link.transmitted_count(), 0, "we never transmitted");

    let stats = core.bus().stats();
    assert_eq!(stats.other_requests_seen, 1);
    assert_eq!(stats.other_responses_paired, 1);
}

// ============================================================================
// Scenario 6: bounded arbitration under traffic
// ============================================================================

#[test]
fn test_arbitration_waits_for_real_gap() {
    let (clock, link, core) = build_core();

    // Dense phase: a byte every 2ms for 30ms. Every gap is shorter than
    // the 3.6ms silence requirement.
    let base = clock.uptime_us();
    for i in 0..15u64 {
        link.feed_at(base + i * 2000, &[0x55], 0);
    }

    core.bus()
        .enqueue_read(1, FC_READ_HOLDING_REGISTERS, 0, 1, None);

    for _ in 0..10 {
        core.tick();
        clock.advance_us(2000);
        if clock.uptime_us() > base + 28_000 {
            break;
        }
    }
    assert_eq!(
        link.transmitted_count(),
        0,
        "no gap in the dense phase was long enough"
    );

    // Sparse phase: >=4ms gaps appear; within three ticks the request
    // must go out.
    clock.advance_us(1000);
    let mut sent_after = 0;
    for _ in 0..3 {
        core.tick();
        clock.advance_us(4500);
        if link.transmitted_count() == 1 {
            sent_after += 1;
            break;
        }
    }
    assert!(
        link.transmitted_count() == 1 && sent_after <= 3,
        "request transmitted once a real gap appeared"
    );
}

// ============================================================================
// Observability
// ============================================================================

#[test]
fn test_snapshots_serialize_for_export() {
    let (clock, link, core) = build_core();
    clock.set_epoch_secs(1_700_000_000);
    link.set_responder(0, |request| {
        (request[1] == FC_READ_HOLDING_REGISTERS)
            .then(|| (2000, with_crc(&[0x01, 0x03, 0x02, 0x01, 0xC8])))
    });

    core.devices()
        .load_type(
            br#"{"name": "T", "registers": [
                {"name": "power", "address": 0, "functionCode": 3,
                 "dataType": "uint16", "unit": "W", "pollInterval": 100}]}"#,
        )
        .expect("type loads");
    core.devices()
        .load_mapping(br#"{"devices": [{"unitId": 1, "type": "T", "name": "Main"}]}"#)
        .expect("mapping loads");

    spin(&clock, &core, 20, 5000);

    let snapshot = core.devices().snapshot(1).expect("snapshot");
    let json = serde_json::to_value(&snapshot).expect("serializes");
    let value = &json["values"][0];
    assert_eq!(value["name"], "power");
    assert_eq!(value["value"], 456.0);
    assert_eq!(value["valid"], true);
    // Wall time is known: uptime plus epoch plus ISO label
    assert!(value["timestamp"]["uptimeMs"].is_u64());
    assert_eq!(value["timestamp"]["epoch"], 1_700_000_000u32);
    assert!(value["timestamp"]["iso"].as_str().is_some());

    let frames = core.bus().recent_frames();
    assert!(!frames.is_empty());
    let summary = frames.last().expect("frame present").summary();
    serde_json::to_string(&summary).expect("frame summary serializes");
}
