use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::damping::{DampingEstimator, LinearDampingEstimator};
use crate::error::ConfigError;

/// The reflective infrared sensor has no hysteresis, so the daemon filters
/// out sub-millisecond glitches for us.
const DEFAULT_GLITCH_FILTER_US: u32 = 1000;

fn default_glitch_filter_us() -> u32 {
    DEFAULT_GLITCH_FILTER_US
}

/// How the machine brakes its flywheel; selects the damping estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Magnetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Raspberry Pi running the pigpio daemon
    pub ip_address: String,
    pub pigpio_daemon_port: u16,
    pub gpio_pin_number: u8,
    #[serde(default = "default_glitch_filter_us")]
    pub glitch_filter_us: u32,

    pub num_flywheel_encoder_pulses_per_revolution: u32,
    pub machine_type: MachineType,
    /// Inertia in units such that torque = inertia * angular acceleration
    /// (rev/s^2), so the torque unit is defined by this value.
    pub flywheel_moment_of_inertia: f64,

    /// Where raw-pulse logs are written on save
    pub log_folder_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ip_address: "192.168.1.242".to_string(),
            pigpio_daemon_port: 9876,
            gpio_pin_number: 17,
            glitch_filter_us: DEFAULT_GLITCH_FILTER_US,
            num_flywheel_encoder_pulses_per_revolution: 4,
            machine_type: MachineType::Magnetic,
            flywheel_moment_of_inertia: 1.0,
            log_folder_path: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_flywheel_encoder_pulses_per_revolution < 1 {
            return Err(ConfigError::InvalidPulsesPerRev {
                value: self.num_flywheel_encoder_pulses_per_revolution,
            });
        }
        if self.flywheel_moment_of_inertia <= 0.0 {
            return Err(ConfigError::InvalidInertia {
                value: self.flywheel_moment_of_inertia,
            });
        }
        Ok(())
    }

    /// Damping estimator for the configured machine type.
    pub fn damping_estimator(&self) -> DampingEstimator {
        match self.machine_type {
            MachineType::Magnetic => DampingEstimator::Linear(LinearDampingEstimator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.ip_address, config.ip_address);
        assert_eq!(loaded.machine_type, MachineType::Magnetic);
        assert_eq!(loaded.glitch_filter_us, DEFAULT_GLITCH_FILTER_US);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/rowmon.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_unknown_machine_type_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "ip_address": "10.0.0.2",
                "pigpio_daemon_port": 8888,
                "gpio_pin_number": 17,
                "num_flywheel_encoder_pulses_per_revolution": 4,
                "machine_type": "steam",
                "flywheel_moment_of_inertia": 1.0,
                "log_folder_path": "/tmp"
            }"#,
        )
        .unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_pulses_per_rev_rejected() {
        let mut config = Config::default();
        config.num_flywheel_encoder_pulses_per_revolution = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPulsesPerRev { value: 0 })
        ));
    }

    #[test]
    fn test_non_positive_inertia_rejected() {
        let mut config = Config::default();
        config.flywheel_moment_of_inertia = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInertia { .. })
        ));
    }

    #[test]
    fn test_glitch_filter_defaults_when_omitted() {
        let json = r#"{
            "ip_address": "10.0.0.2",
            "pigpio_daemon_port": 8888,
            "gpio_pin_number": 17,
            "num_flywheel_encoder_pulses_per_revolution": 4,
            "machine_type": "magnetic",
            "flywheel_moment_of_inertia": 1.0,
            "log_folder_path": "/tmp"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.glitch_filter_us, DEFAULT_GLITCH_FILTER_US);
    }
}
