//! Integration tests for the instrument drivers on the mock transport
//!
//! Each driver is built exactly as the configuration factory builds it, then
//! exercised through dotted parameter paths.

use chrono::NaiveDate;
use scpi_daq::adapters::{MockAdapter, Transport};
use scpi_daq::channel::Channel;
use scpi_daq::config::{Driver, InstrumentDefinition};
use scpi_daq::identity::{DeviceIdentity, IdentityParser, OutputType};
use scpi_daq::instruments::bluefors::{self, BlueForsOptions};
use scpi_daq::instruments::{self, stahl_hv324};
use scpi_daq::parameter::Parameter;
use scpi_daq::{DaqError, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn definition(id: &str, driver: Driver) -> InstrumentDefinition {
    InstrumentDefinition {
        id: id.to_string(),
        driver,
        enabled: true,
        port: Some("/dev/null".into()),
        baud_rate: None,
        timeout: Duration::from_millis(100),
        terminator: None,
        options: toml::Table::new(),
    }
}

fn hv_mock() -> Arc<MockAdapter> {
    Arc::new(
        MockAdapter::new()
            .with_reply("IDN", "HV324 300 03 b")
            .with_default_reply(stahl_hv324::ACK),
    )
}

// =============================================================================
// Identity
// =============================================================================

#[test]
fn test_identity_round_trip() {
    let identity = DeviceIdentity {
        model: "BS".into(),
        serial: "015".into(),
        range: 100.0,
        channel_count: 16,
        variant: OutputType::Quadrupole,
    };
    let parser = IdentityParser::stahl();
    let parsed = parser.parse(&identity.to_reply()).unwrap();
    assert_eq!(parsed, identity);
    assert_eq!(parsed.identifier(), "BS015");
}

#[test]
fn test_identity_without_variant_is_unrecognized() {
    let err = IdentityParser::stahl().parse("HV324 300 03").unwrap_err();
    assert!(matches!(err, DaqError::UnrecognizedDevice(_)));
}

// =============================================================================
// Stahl HV324
// =============================================================================

#[tokio::test]
async fn test_hv324_builds_reported_channels() {
    let mock = hv_mock();
    let hv = stahl_hv324::connect("hv", mock.clone(), &Default::default())
        .await
        .unwrap();

    let identity = hv.identity().unwrap();
    assert_eq!(identity.channel_count, 3);
    assert_eq!(identity.range, 300.0);
    for ch in ["ch01", "ch02", "ch03"] {
        assert!(hv.parameter(&format!("{}.voltage", ch)).is_ok());
    }
    assert!(matches!(
        hv.parameter("ch04.voltage"),
        Err(DaqError::UnknownParameter(_))
    ));

    let log = mock.get_call_log();
    assert_eq!(log[0], "IDN");
    assert!(log.contains(&"HV324 DIS AUTO 0".to_string()));
    assert!(log.contains(&"HV324 DIS L02 ch02".to_string()));
}

#[test]
fn test_hv324_channel_bounds() {
    let identity = Arc::new(IdentityParser::stahl().parse("HV324 300 03 b").unwrap());
    assert!(Channel::numbered("ch03", 3, &identity).is_ok());
    assert!(matches!(
        Channel::numbered("ch04", 4, &identity),
        Err(DaqError::InvalidChannel {
            index: 4,
            channel_count: 3
        })
    ));

    let mut channel = Channel::numbered("ch01", 1, &identity).unwrap();
    let make = || {
        Parameter::builder("voltage")
            .get_fn(|| async { Ok(Value::Float(0.0)) })
            .build()
            .unwrap()
    };
    channel.add_parameter(make()).unwrap();
    assert!(matches!(
        channel.add_parameter(make()),
        Err(DaqError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_hv324_voltage_codec_and_ack() {
    let mock = hv_mock();
    mock.set_reply("HV324 V01", "0.504167");
    let hv = stahl_hv324::connect("hv", mock.clone(), &Default::default())
        .await
        .unwrap();
    let voltage = hv.parameter("ch01.voltage").unwrap();

    let read = voltage.get().await.unwrap().as_f64().unwrap();
    assert!((read - 2.5).abs() < 1e-3, "read {read}");

    mock.clear_call_log();
    voltage.set(-1.5).await.unwrap();
    assert_eq!(mock.get_call_log(), vec!["HV324 CH01 0.497500"]);
    assert!(voltage.latest().unwrap().valid);

    let err = voltage.set(12.0).await.unwrap_err();
    assert!(matches!(err, DaqError::InvalidValue { .. }));
}

#[tokio::test]
#[traced_test]
async fn test_hv324_missing_ack_is_a_warning() {
    let mock = hv_mock();
    let hv = stahl_hv324::connect("hv", mock.clone(), &Default::default())
        .await
        .unwrap();
    mock.set_reply("HV324 CH02 0.500000", "?");

    let voltage = hv.parameter("ch02.voltage").unwrap();
    voltage.set(0.0).await.unwrap();
    assert!(!voltage.latest().unwrap().valid);
    assert!(logs_contain("acknowledgement mismatch"));
}

#[tokio::test]
async fn test_hv324_current_with_unit_suffix() {
    let mock = hv_mock();
    mock.set_reply("HV324 I03", "0.125mA");
    let hv = stahl_hv324::connect("hv", mock.clone(), &Default::default())
        .await
        .unwrap();
    let current = hv.parameter("ch03.current").unwrap().get().await.unwrap();
    assert!((current.as_f64().unwrap() - 1.25e-4).abs() < 1e-12);
}

#[tokio::test]
async fn test_hv324_ramp_annotates_display() {
    let mock = hv_mock();
    mock.set_reply("HV324 V01", "0.500000");
    let mut options = stahl_hv324::HvOptions::default();
    options.channel_names.insert("1".into(), "gate".into());
    let hv = stahl_hv324::connect("hv", mock.clone(), &options)
        .await
        .unwrap();
    mock.clear_call_log();

    hv.ramp("gate.voltage", 2.5, 1.0, Duration::ZERO, None)
        .await
        .unwrap();

    assert_eq!(
        mock.get_call_log(),
        vec![
            "HV324 DIS L01 gate ramp  2.5000V",
            "HV324 V01",
            "HV324 CH01 0.501667",
            "HV324 CH01 0.503333",
            "HV324 CH01 0.504167",
            "HV324 DIS L01 gate set  2.5000V",
        ]
    );
    assert_eq!(hv.parameter("gate.voltage").unwrap().step(), None);
}

#[tokio::test]
async fn test_hv324_factory_options() {
    let mut def = definition("hv", Driver::Hv324);
    def.options
        .insert("voltage_limit".into(), toml::Value::Float(1.0));
    let hv = instruments::connect_with(&def, Some(hv_mock() as Arc<dyn Transport>))
        .await
        .unwrap();
    let err = hv.parameter("ch01.voltage").unwrap().set(2.0).await.unwrap_err();
    assert!(matches!(err, DaqError::InvalidValue { .. }));
}

// =============================================================================
// Table drivers
// =============================================================================

#[tokio::test]
async fn test_sg384_frequency_and_mapping() {
    let mock = Arc::new(MockAdapter::echo());
    let sg = instruments::connect_with(
        &definition("sg", Driver::Sg384),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    sg.parameter("frequency").unwrap().set(1.5e9).await.unwrap();
    sg.parameter("modulation_type").unwrap().set("FM").await.unwrap();
    sg.parameter("enable_RF").unwrap().set("ON").await.unwrap();
    assert_eq!(
        mock.writes(),
        vec!["FREQ 1500000000.000", "TYPE 1", "ENBR 1"]
    );
    assert_eq!(
        sg.parameter("modulation_type").unwrap().get().await.unwrap(),
        Value::Text("FM".into())
    );
    assert!(matches!(
        sg.parameter("frequency").unwrap().set(5e9).await,
        Err(DaqError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn test_mg3692_identity() {
    let mock = Arc::new(MockAdapter::new().with_reply("*IDN?", "ANRITSU,MG3692C,123456,3.52"));
    let mg = instruments::connect_with(
        &definition("mg", Driver::Mg3692),
        Some(mock as Arc<dyn Transport>),
    )
    .await
    .unwrap();
    let idn = mg.idn().unwrap();
    assert_eq!(idn.vendor, "ANRITSU");
    assert_eq!(idn.model, "MG3692C");
}

#[tokio::test]
async fn test_mg3692_survives_missing_identity() {
    let mock = Arc::new(MockAdapter::new());
    let mg = instruments::connect_with(
        &definition("mg", Driver::Mg3692),
        Some(mock as Arc<dyn Transport>),
    )
    .await
    .unwrap();
    assert!(mg.idn().is_none());
    assert!(mg.parameter("power").is_ok());
}

#[tokio::test]
async fn test_ms2830_edges_are_ordered() {
    let mock = Arc::new(
        MockAdapter::echo()
            .with_reply(":SENSe:FREQuency:STARt?", "1000000")
            .with_reply(":SENSe:FREQuency:STOP?", "2000000"),
    );
    let sa = instruments::connect_with(
        &definition("sa", Driver::Ms2830),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    let err = sa.parameter("start").unwrap().set(3e6).await.unwrap_err();
    assert!(matches!(err, DaqError::InvalidValue { .. }));
    assert!(mock.writes().is_empty());

    let err = sa.parameter("stop").unwrap().set(5e5).await.unwrap_err();
    assert!(matches!(err, DaqError::InvalidValue { .. }));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_ms2830_frequency_axis_follows_point_count() {
    let mock = Arc::new(
        MockAdapter::new()
            .with_reply(":SENSe:FREQuency:STARt?", "1e6")
            .with_reply(":SENSe:FREQuency:STOP?", "2e6")
            .with_reply(":SENSe:SWEep:POINts?", "5")
            .with_reply("TRAC? TRAC1", "-10,-20,-30,-40,-50"),
    );
    let sa = instruments::connect_with(
        &definition("sa", Driver::Ms2830),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    let axis = sa.parameter("freq_axis").unwrap().get().await.unwrap();
    assert_eq!(
        axis,
        Value::Array(vec![1.0e6, 1.25e6, 1.5e6, 1.75e6, 2.0e6])
    );
    let trace = sa.parameter("spectrum").unwrap().get().await.unwrap();
    assert_eq!(trace.as_array().unwrap().len(), 5);

    mock.set_reply(":SENSe:SWEep:POINts?", "3");
    sa.parameter("npts").unwrap().get().await.unwrap();
    assert!(matches!(
        sa.parameter("spectrum").unwrap().get().await,
        Err(DaqError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn test_ms2830_single_sweep_sequence() {
    let mock = Arc::new(MockAdapter::new().with_reply(":INITiate:SWP?", "0"));
    let sa = instruments::connect_with(
        &definition("sa", Driver::Ms2830),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    sa.parameter("single").unwrap().set(4).await.unwrap();
    assert_eq!(
        mock.get_call_log(),
        vec![
            ":SENSe:AVERage:COUNt 4",
            "TRAC1:STOR:MODE AVER",
            ":INITiate:SWP",
            "*WAI",
            ":INITiate:SWP?"
        ]
    );
}

#[tokio::test]
async fn test_li5660_fetch_fields() {
    let mock = Arc::new(
        MockAdapter::new()
            .with_reply(":FETC?", "1.5,45.0,1.06,1.06")
            .with_reply(":DATA?", "30"),
    );
    let lockin = instruments::connect_with(
        &definition("lockin", Driver::Li5660),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    assert_eq!(lockin.parameter("T").unwrap().get().await.unwrap(), Value::Float(45.0));
    assert_eq!(
        lockin.parameter("output_config").unwrap().get().await.unwrap(),
        Value::Text("R,T,X,Y".into())
    );
    let data = lockin.parameter("get_data").unwrap().get().await.unwrap();
    assert_eq!(data.as_array().unwrap().len(), 4);

    lockin.parameter("output_config").unwrap().set("R,T").await.unwrap();
    assert!(matches!(
        lockin.parameter("get_data").unwrap().get().await,
        Err(DaqError::InvalidValue { .. })
    ));
    assert!(matches!(
        lockin.parameter("slope").unwrap().set(9).await,
        Err(DaqError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn test_ah2500a_capacitance_field() {
    let mock = Arc::new(MockAdapter::new().with_reply("TRG", "C= 12.34567 PF L= 0.00012 NS"));
    let bridge = instruments::connect_with(
        &definition("bridge", Driver::Ah2500a),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    let c = bridge.parameter("C").unwrap().get().await.unwrap();
    assert_eq!(c, Value::Float(12.34567));
    bridge.parameter("mode").unwrap().set("cont").await.unwrap();
    assert_eq!(mock.writes(), vec!["CONTINUOUS"]);
}

#[tokio::test]
async fn test_afg31000_model_check() {
    let mock = Arc::new(
        MockAdapter::echo().with_reply("*IDN?", "TEKTRONIX,AFG31252,C010101,FV:1.5.2"),
    );
    let afg = instruments::connect_with(
        &definition("afg", Driver::Afg31000),
        Some(mock.clone() as Arc<dyn Transport>),
    )
    .await
    .unwrap();

    afg.parameter("ch2.amplitude").unwrap().set(1.5).await.unwrap();
    assert_eq!(
        mock.writes(),
        vec!["SOURce2:VOLTage:LEVel:IMMediate:AMPLitude 1.5"]
    );
    assert!(matches!(
        afg.parameter("ch1.amplitude").unwrap().set(2.5).await,
        Err(DaqError::InvalidValue { .. })
    ));

    let other = Arc::new(MockAdapter::new().with_reply("*IDN?", "TEKTRONIX,AFG31022,C1,FV:1.0"));
    let err = instruments::connect_with(
        &definition("afg", Driver::Afg31000),
        Some(other as Arc<dyn Transport>),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DaqError::UnrecognizedDevice(_)));
}

// =============================================================================
// BlueFors
// =============================================================================

fn fridge_options(root: &Path) -> BlueForsOptions {
    BlueForsOptions {
        folder_path: root.to_path_buf(),
        channel_vacuum_can: 1,
        channel_pumping_line: 2,
        channel_compressor_outlet: 3,
        channel_compressor_inlet: 4,
        channel_mixture_tank: 5,
        channel_venting_line: 6,
        channel_50k_plate: 1,
        channel_4k_plate: 2,
        channel_still: 5,
        channel_mixing_chamber: 6,
        channel_cell: 8,
        channel_magnet: None,
    }
}

fn log_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

#[tokio::test]
async fn test_bluefors_reads_latest_log_row() {
    let dir = tempfile::tempdir().unwrap();
    let day_dir = dir.path().join("24-03-04");
    std::fs::create_dir_all(&day_dir).unwrap();
    std::fs::write(
        day_dir.join("CH6 T 24-03-04.log"),
        " 04-03-24,10:00:00,1.100000E+1\n 04-03-24,10:01:00,1.234000E+1\n",
    )
    .unwrap();

    let fridge =
        bluefors::connect_with_date("fridge", &fridge_options(dir.path()), log_day).unwrap();
    let mxc = fridge.parameter("temperature_mixing_chamber").unwrap();
    assert_eq!(mxc.unit(), Some("K"));
    let value = mxc.get().await.unwrap().as_f64().unwrap();
    assert!((value - 12.34).abs() < 1e-9);
    assert!(!mxc.is_settable());
}

#[tokio::test]
#[traced_test]
async fn test_bluefors_missing_log_reads_nan() {
    let dir = tempfile::tempdir().unwrap();
    let fridge =
        bluefors::connect_with_date("fridge", &fridge_options(dir.path()), log_day).unwrap();

    let value = fridge
        .parameter("pressure_vacuum_can")
        .unwrap()
        .get()
        .await
        .unwrap();
    assert!(value.is_nan());
    assert!(logs_contain("returning NaN"));

    let report = bluefors::status_report(&fridge).await.unwrap();
    assert!(report.contains("VC(P1) = NaN mbar"));
    assert!(report.contains("MXC = NaN K"));
}

#[tokio::test]
async fn test_bluefors_snapshot_lists_all_sensors() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = fridge_options(dir.path());
    options.channel_magnet = Some(7);
    let fridge = bluefors::connect_with_date("fridge", &options, log_day).unwrap();

    let snapshot = fridge.snapshot(false).await;
    let parameters = snapshot["parameters"].as_object().unwrap();
    assert_eq!(parameters.len(), 12);
    assert!(parameters.contains_key("temperature_magnet"));
}
