mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use common::init_logging;
use rs_instrument::transport::mock::{SimTransport, WriteLog};
use rs_instrument::validators::strict_range;
use rs_instrument::{
    Channel, CommandSpec, CommandTable, Error, Health, Profile, Session, Tsp, Value, Values,
};

const EMPTY_QUEUE: &str = "0.00000e+00\tQueue Is Empty\t0\t0";

/// A two-channel source-measure unit speaking TSP.
struct Smu {
    attributes: HashMap<String, String>,
    errors: VecDeque<String>,
}

impl Smu {
    fn respond(&mut self, command: &str) -> Option<String> {
        match command {
            "*IDN?" => Some("Keithley Instruments Inc., Model 2602B, 4000000, 3.2.1".into()),
            "waitcomplete() print([[1]])" => Some("1".into()),
            "print(errorqueue.next())" => {
                Some(self.errors.pop_front().unwrap_or_else(|| EMPTY_QUEUE.into()))
            }
            _ => {
                if let Some(name) = command.strip_prefix("print(").and_then(|c| c.strip_suffix(')')) {
                    return self.attributes.get(name).cloned();
                }
                match command.split_once('=') {
                    Some((name, value)) if name.starts_with("smu") => {
                        self.attributes.insert(name.trim().into(), value.trim().into());
                    }
                    _ => self
                        .errors
                        .push_back("-2.85000e+02\tProgram syntax\t20\t2".into()),
                }
                None
            }
        }
    }
}

fn smu_device() -> (SimTransport, Arc<Mutex<Smu>>, WriteLog) {
    let smu = Arc::new(Mutex::new(Smu {
        attributes: HashMap::new(),
        errors: VecDeque::new(),
    }));
    let device = {
        let smu = Arc::clone(&smu);
        SimTransport::new(move |command| smu.lock().unwrap().respond(command))
    };
    let log = device.log();
    (device, smu, log)
}

fn channel_table() -> CommandTable {
    CommandTable::builder("smu channel")
        .command(
            "source_current",
            CommandSpec::control("source.leveli", "source.leveli=%f", "Source current in amps")
                .values(Values::range(-1.5, 1.5))
                .validator(strict_range),
        )
        .command(
            "output",
            CommandSpec::control("source.output", "source.output=%d", "Output state")
                .values(Values::mapping([("OFF", 0), ("ON", 1)]))
                .map_values(true),
        )
        .command(
            "compliance",
            CommandSpec::measurement("source.compliance", "True when in compliance")
                .decode(|v| Ok(Value::Int(i64::from(v.as_str() == Some("true"))))),
        )
        .build()
        .unwrap()
}

fn profile() -> Profile {
    Profile::new("Keithley 2602B", "Keithley Instruments Inc., Model 2602B")
        .with_dialect(Tsp)
        .with_shutdown_command("smua.source.output=0")
        .with_shutdown_command("smub.source.output=0")
}

fn channel(id: &str) -> Channel {
    Channel::new(id, channel_table())
        .with_read_wrapper("print(smu{ch}.{cmd})")
        .with_write_wrapper("smu{ch}.{cmd}")
}

#[test]
fn tsp_session_identifies() {
    init_logging();
    let (device, _, _) = smu_device();
    let session = Session::new(profile(), device).unwrap();

    assert!(session.is_healthy());
    assert_eq!(session.status(), Health::Ready);
    assert!(session.identification().contains("2602B"));
}

#[test]
fn channel_wraps_reads_and_writes() {
    init_logging();
    let (device, smu, log) = smu_device();
    let session = Session::new(profile(), device).unwrap();
    let (a, b) = (channel("a"), channel("b"));

    a.set(&session, "source_current", 0.001).unwrap();
    b.set(&session, "output", "ON").unwrap();

    assert!(log.commands().contains(&"smua.source.leveli=0.001000".to_string()));
    assert!(log.commands().contains(&"smub.source.output=1".to_string()));
    assert_eq!(
        smu.lock().unwrap().attributes.get("smua.source.leveli").map(String::as_str),
        Some("0.001000")
    );

    smu.lock()
        .unwrap()
        .attributes
        .insert("smua.source.leveli".into(), "1.00000e-03".into());
    assert_eq!(a.get_as::<f64>(&session, "source_current").unwrap(), 0.001);
    assert_eq!(b.get(&session, "output").unwrap(), Value::from("ON"));
    assert!(matches!(
        a.set(&session, "source_current", 2.0),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn channel_free_form_commands_are_wrapped() {
    init_logging();
    let (device, smu, _) = smu_device();
    let session = Session::new(profile(), device).unwrap();
    let a = channel("a");

    a.write(&session, "source.limitv=20").unwrap();
    assert_eq!(a.ask(&session, "source.limitv").unwrap(), "20");

    smu.lock()
        .unwrap()
        .attributes
        .insert("smua.source.compliance".into(), "true".into());
    assert_eq!(a.get(&session, "compliance").unwrap(), Value::Int(1));
}

#[test]
fn tsp_error_queue_raises_communication_error() {
    init_logging();
    let (device, _, _) = smu_device();
    let session = Session::new(profile(), device).unwrap();

    match session.write("beeper.beep(") {
        Err(Error::CommunicationError { first, .. }) => {
            assert_eq!(first.code, -285);
            assert_eq!(first.message, "Program syntax");
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(session.check_errors().is_ok());
}

#[test]
fn shutdown_turns_both_outputs_off() {
    init_logging();
    let (device, smu, log) = smu_device();
    let session = Session::new(profile(), device).unwrap();
    channel("a").set(&session, "output", "ON").unwrap();

    session.shutdown();

    {
        let smu = smu.lock().unwrap();
        assert_eq!(smu.attributes.get("smua.source.output").map(String::as_str), Some("0"));
        assert_eq!(smu.attributes.get("smub.source.output").map(String::as_str), Some("0"));
    }
    assert_eq!(log.commands_where(|c| c.ends_with("output=0")).len(), 2);
    assert!(matches!(
        channel("a").get(&session, "output"),
        Err(Error::AlreadyShutDown(_))
    ));
}
