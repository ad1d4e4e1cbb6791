//! Channel lists as operators write them in rig configuration files.

use wave_core::{BackendCapabilities, BoardInfo, ChannelConfig, SensorType, VoltageRange};

#[derive(serde::Deserialize)]
struct Rig {
    channels: Vec<ChannelConfig>,
}

const RIG: &str = r#"
[[channels]]
id = 0
name = "WG1"
gain = 0.0412
offset = 0.013

[[channels]]
id = 1
name = "WG2"
voltage_range = "bipolar_5v"

[[channels]]
id = 4
name = "PT1"
sensor_type = "pressure_transducer"
voltage_range = "unipolar_10v"
"#;

fn flume_board() -> BackendCapabilities {
    BackendCapabilities {
        max_channels: 16,
        min_sample_rate: 1.0,
        max_sample_rate: 100_000.0,
        voltage_ranges: VoltageRange::ALL.to_vec(),
        boards: vec![BoardInfo::new("/dev/comedi0", "pci-6221")],
    }
}

#[test]
fn test_parse_rig_channels() {
    let rig: Rig = toml::from_str(RIG).unwrap();
    assert_eq!(rig.channels.len(), 3);

    let wg1 = &rig.channels[0];
    assert_eq!(wg1.sensor_type, SensorType::WaveGauge);
    assert_eq!(wg1.voltage_range, VoltageRange::Bipolar10V);
    assert!((wg1.gain - 0.0412).abs() < 1e-12);

    assert_eq!(rig.channels[1].voltage_range, VoltageRange::Bipolar5V);
    assert_eq!(rig.channels[2].sensor_type, SensorType::PressureTransducer);

    assert!(flume_board().validate_channels(&rig.channels).is_ok());
}

#[test]
fn test_board_with_fewer_channels_rejects_rig() {
    let rig: Rig = toml::from_str(RIG).unwrap();
    let small = BackendCapabilities {
        max_channels: 2,
        ..flume_board()
    };
    assert!(small.validate_channels(&rig.channels).is_err());
}
