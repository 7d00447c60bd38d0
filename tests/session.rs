mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use common::{init_logging, is_payload, scpi_device, ErrorQueue};
use rs_instrument::transport::mock::{ProtocolTransport, SimTransport};
use rs_instrument::transport::Transport;
use rs_instrument::{
    Completion, ElementType, Error, Health, Profile, Session, SessionConfig, Tsp, Value,
};

fn profile() -> Profile {
    Profile::new("ACME DMM", "ACME,DMM")
}

fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_ready_timeout(Duration::from_millis(200))
}

#[test]
fn healthy_session_reports_identification() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1234,1.0", ErrorQueue::default(), |_| None);
    let session = Session::new(profile(), device).unwrap();

    assert!(session.is_healthy());
    assert_eq!(session.identification(), "ACME,DMM-1,1234,1.0");
    assert_eq!(session.status(), Health::Ready);
}

#[test]
fn mismatching_identification_degrades_without_failing() {
    init_logging();
    let device = scpi_device("OTHER,SCOPE,1,1.0", ErrorQueue::default(), |command| {
        (command == "MEAS?").then(|| "1.5".to_string())
    });
    let session = Session::new(profile(), device).unwrap();

    assert!(!session.is_healthy());
    assert_eq!(session.identification(), "OTHER,SCOPE,1,1.0");
    assert_eq!(session.status(), Health::Degraded);
    assert_eq!(session.ask("MEAS?").unwrap(), "1.5");
}

#[test]
fn degraded_session_recovers_when_probe_succeeds() {
    init_logging();
    let awake = Arc::new(AtomicBool::new(false));
    let device = {
        let awake = Arc::clone(&awake);
        SimTransport::new(move |command| match command {
            "*OPC?" => Some("1".to_string()),
            "SYST:ERR?" => Some(common::NO_ERROR.to_string()),
            "*IDN?" if awake.load(Ordering::SeqCst) => Some("ACME,DMM-1,1,1.0".to_string()),
            "*IDN?" => Some(String::new()),
            _ => None,
        })
    };
    let session = Session::new(profile(), device).unwrap();
    assert_eq!(session.status(), Health::Degraded);

    awake.store(true, Ordering::SeqCst);
    assert_eq!(session.status(), Health::Ready);
    assert!(session.is_healthy());
}

#[test]
fn instrument_that_never_completes_times_out() {
    init_logging();
    let busy = Arc::new(AtomicBool::new(false));
    let device = {
        let busy = Arc::clone(&busy);
        SimTransport::new(move |command| match command {
            "*OPC?" if busy.load(Ordering::SeqCst) => Some("0".to_string()),
            "*OPC?" => Some("1".to_string()),
            "SYST:ERR?" => Some(common::NO_ERROR.to_string()),
            "*IDN?" => Some("ACME,DMM-1,1,1.0".to_string()),
            _ => None,
        })
    };
    let log = device.log();
    let transport: Box<dyn Transport> = Box::new(device);
    let session = Session::open(profile(), transport, fast_config()).unwrap();

    busy.store(true, Ordering::SeqCst);
    log.clear();
    let started = Instant::now();
    let result = session.write("INIT");

    assert!(matches!(result, Err(Error::Timeout(timeout)) if timeout == Duration::from_millis(200)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(200 + 3 * 10), "timed out after {elapsed:?}");
    assert!(log.commands_where(is_payload).is_empty());
    assert_eq!(session.complete().unwrap(), Completion::Pending);
}

#[test]
fn queued_fault_becomes_communication_error() {
    init_logging();
    let transport = ProtocolTransport::new([
        (Some("*OPC?"), Some("1")),
        (Some("SYST:ERR?"), Some("+0, No error")),
        (Some("*OPC?"), Some("1")),
        (Some("*IDN?"), Some("ACME,DMM-1,1,1.0")),
        (Some("*OPC?"), Some("1")),
        (Some("SYST:ERR?"), Some("+0, No error")),
        (Some("*OPC?"), Some("1")),
        (Some("BOGUS"), None),
        (Some("*OPC?"), Some("1")),
        (Some("SYST:ERR?"), Some("-113, Undefined header")),
        (Some("SYST:ERR?"), Some("+0, No error")),
    ]);
    let script = transport.clone();
    let session = Session::new(profile(), transport).unwrap();

    let err = session.write("BOGUS").unwrap_err();
    assert!(err.to_string().contains("Undefined header"));
    match err {
        Error::CommunicationError { first, queued } => {
            assert_eq!(first.code, -113);
            assert_eq!(queued.len(), 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(script.is_complete());
}

#[test]
fn flush_returns_every_queued_error() {
    init_logging();
    let errors = ErrorQueue::default();
    let device = scpi_device("ACME,DMM-1,1,1.0", errors.clone(), |_| None);
    let session = Session::new(profile(), device).unwrap();

    errors.push("-222,\"Data out of range\"");
    errors.push("-113,\"Undefined header\"");
    let flushed = session.flush_errors().unwrap();

    let codes: Vec<i32> = flushed.iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![-222, -113]);
    assert_eq!(flushed[0].message, "Data out of range");
    assert!(session.check_errors().is_ok());
}

#[test]
fn error_drain_is_capped() {
    init_logging();
    let device = SimTransport::new(|command| match command {
        "*OPC?" => Some("1".to_string()),
        "SYST:ERR?" => Some("-100,\"Command error\"".to_string()),
        "*IDN?" => Some("ACME,DMM-1,1,1.0".to_string()),
        _ => None,
    });
    let transport: Box<dyn Transport> = Box::new(device);
    let config = fast_config().with_max_queued_errors(5);
    let session = Session::open(profile(), transport, config).unwrap();

    assert!(!session.is_healthy());
    assert_eq!(session.flush_errors().unwrap().len(), 5);
}

#[test]
fn status_is_busy_while_a_transaction_holds_the_gate() {
    init_logging();
    let (entered, inside) = mpsc::channel();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), move |command| {
        if command == "SLOW?" {
            let _ = entered.send(());
            thread::sleep(Duration::from_millis(300));
            return Some("done".to_string());
        }
        None
    });
    let session = Arc::new(Session::new(profile(), device).unwrap());

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.ask("SLOW?"))
    };

    inside.recv().unwrap();
    assert_eq!(session.status(), Health::Busy);
    assert_eq!(worker.join().unwrap().unwrap(), "done");
    assert_eq!(session.status(), Health::Ready);
}

#[test]
fn transaction_runs_steps_back_to_back() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |command| {
        (command == "FETC?").then(|| "0.25".to_string())
    });
    let log = device.log();
    let session = Session::new(profile(), device).unwrap();
    log.clear();

    let reading = session
        .transaction(|tx| {
            tx.write("INIT")?;
            tx.ask("FETC?")
        })
        .unwrap();

    assert_eq!(reading, "0.25");
    assert_eq!(log.commands(), vec!["INIT", "FETC?"]);
}

#[test]
fn values_and_binary_blocks_are_decoded() {
    init_logging();
    let device = SimTransport::raw(|command| {
        let text = |s: &str| Some(s.as_bytes().to_vec());
        match command {
            "*OPC?" => text("1"),
            "SYST:ERR?" => text(common::NO_ERROR),
            "*IDN?" => text("ACME,DMM-1,1,1.0"),
            "DATA?" => text("1, 2.5, OVER"),
            "CURV?" => {
                let mut block = b"#18".to_vec();
                block.extend_from_slice(&1.0f32.to_le_bytes());
                block.extend_from_slice(&(-2.5f32).to_le_bytes());
                block.push(b'\n');
                Some(block)
            }
            _ => None,
        }
    });
    let session = Session::new(profile(), device).unwrap();

    assert_eq!(
        session.read_values("DATA?", ",").unwrap(),
        vec![Value::Int(1), Value::Float(2.5), Value::from("OVER")]
    );
    assert_eq!(
        session.read_binary_values("CURV?", 3, ElementType::F32).unwrap(),
        vec![1.0, -2.5]
    );
}

#[test]
fn base_vocabulary_follows_the_dialect() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |command| {
        (command == "*OPT?").then(|| "MEM,GPIB".to_string())
    });
    let log = device.log();
    let session = Session::new(profile(), device).unwrap();

    assert_eq!(session.id().unwrap(), "ACME,DMM-1,1,1.0");
    assert_eq!(session.complete().unwrap(), Completion::Complete);
    assert_eq!(session.options().unwrap(), "MEM,GPIB");
    session.clear().unwrap();
    session.reset().unwrap();
    assert_eq!(log.commands_where(|c| c.starts_with("*C") || c == "*RST"), vec!["*CLS", "*RST"]);

    let tsp = SimTransport::new(|_| None);
    let session = Session::new(Profile::new("SMU", "Keithley").with_dialect(Tsp), tsp).unwrap();
    assert!(matches!(session.options(), Err(Error::UnsupportedDialect(_))));
}

#[test]
fn options_keep_the_codes_verbatim() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |command| {
        (command == "*OPT?").then(|| " 001,1E3,010\n".to_string())
    });
    let session = Session::new(profile(), device).unwrap();

    assert_eq!(session.options().unwrap(), "001,1E3,010");
}

#[test]
fn shutdown_writes_commands_once_and_refuses_more() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |_| None);
    let log = device.log();
    let session = Session::new(profile().with_shutdown_command("OUTP OFF"), device).unwrap();

    session.shutdown();
    session.shutdown();

    assert!(session.is_shut_down());
    assert_eq!(log.commands_where(|c| c == "OUTP OFF").len(), 1);
    assert!(matches!(session.ask("*IDN?"), Err(Error::AlreadyShutDown(_))));
    assert!(matches!(session.get("anything"), Err(Error::UnknownCommand(_))));
}

#[test]
fn shut_down_session_is_not_ready() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |_| None);
    let session = Session::new(profile(), device).unwrap();
    assert_eq!(session.status(), Health::Ready);

    session.shutdown();
    assert_eq!(session.status(), Health::Degraded);
}

#[test]
fn concurrent_shutdowns_write_the_commands_once() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |command| {
        if command == "OUTP OFF" {
            thread::sleep(Duration::from_millis(50));
        }
        None
    });
    let log = device.log();
    let session = Session::new(profile().with_shutdown_command("OUTP OFF"), device).unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| session.shutdown());
        }
    });

    assert!(session.is_shut_down());
    assert_eq!(log.commands_where(|c| c == "OUTP OFF").len(), 1);
}

#[test]
fn dropping_the_session_shuts_it_down() {
    init_logging();
    let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |_| None);
    let log = device.log();
    let session = Session::new(profile().with_shutdown_command("OUTP OFF"), device).unwrap();

    drop(session);
    assert_eq!(log.commands().last().map(String::as_str), Some("SYST:ERR?"));
    assert_eq!(log.commands_where(|c| c == "OUTP OFF").len(), 1);
}

#[test]
fn gpib_address_without_a_transport_is_unavailable() {
    init_logging();
    let result = Session::open(profile(), 22u8, SessionConfig::default());
    match result {
        Err(Error::TransportUnavailable(message)) => assert!(message.contains("GPIB0::22::INSTR")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn connector_receives_locator_and_options() {
    init_logging();
    let profile = profile().with_connector(|locator, options| {
        assert_eq!(locator, "TCPIP0::10.0.0.7::INSTR");
        assert_eq!(options.get("timeout").map(String::as_str), Some("500ms"));
        let device = scpi_device("ACME,DMM-1,1,1.0", ErrorQueue::default(), |_| None);
        let transport: Box<dyn Transport> = Box::new(device);
        Ok(transport)
    });
    let config = SessionConfig::default().with_transport_option("timeout", "500ms");

    let session = Session::open(profile, "TCPIP0::10.0.0.7::INSTR", config).unwrap();
    assert!(session.is_healthy());
}

#[test]
fn config_deserializes_from_toml() {
    let config: SessionConfig = toml::from_str(
        r#"
        poll_interval = "20ms"
        ready_timeout = "2s"

        [transport]
        timeout = "500ms"
        "#,
    )
    .unwrap();

    assert_eq!(config.poll_interval, Duration::from_millis(20));
    assert_eq!(config.ready_timeout, Duration::from_secs(2));
    assert_eq!(config.max_queued_errors, 100);
    assert_eq!(config.transport.get("timeout").map(String::as_str), Some("500ms"));
}
