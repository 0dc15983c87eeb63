use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::audio::envelope::DEFAULT_SAMPLES_TO_SKIP;
use crate::audio::fft::{WindowFunction, DEFAULT_FFT_SIZE};
use crate::audio::processor::DEFAULT_TIME_INFO_CYCLE;
use crate::audio::TapSettings;
use crate::error::{Result, TapError};
use crate::net::{Endpoints, FeatureStream, Protocol, DEFAULT_CONNECT_TIMEOUT};
use crate::params::Parameters;

/// Settings file for the standalone binaries. Every section and key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_signal_level_port")]
    pub signal_level_port: u16,
    #[serde(default = "default_instant_value_port")]
    pub instant_value_port: u16,
    #[serde(default = "default_impulse_port")]
    pub impulse_port: u16,
    #[serde(default = "default_time_info_port")]
    pub time_info_port: u16,
    #[serde(default = "default_fft_port")]
    pub fft_port: u16,
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_samples_to_skip")]
    pub samples_to_skip: usize,
    #[serde(default = "default_time_info_cycle")]
    pub time_info_cycle: usize,
    #[serde(default)]
    pub window: WindowFunction,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            protocol: Protocol::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            signal_level_port: default_signal_level_port(),
            instant_value_port: default_instant_value_port(),
            impulse_port: default_impulse_port(),
            time_info_port: default_time_info_port(),
            fft_port: default_fft_port(),
            osc_port: default_osc_port(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            samples_to_skip: default_samples_to_skip(),
            time_info_cycle: default_time_info_cycle(),
            window: WindowFunction::default(),
        }
    }
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_connect_timeout_ms() -> u64 { DEFAULT_CONNECT_TIMEOUT.as_millis() as u64 }
fn default_signal_level_port() -> u16 { FeatureStream::SignalLevel.default_port() }
fn default_instant_value_port() -> u16 { FeatureStream::InstantValue.default_port() }
fn default_impulse_port() -> u16 { FeatureStream::Impulse.default_port() }
fn default_time_info_port() -> u16 { FeatureStream::TimeInfo.default_port() }
fn default_fft_port() -> u16 { FeatureStream::Fft.default_port() }
fn default_osc_port() -> u16 { FeatureStream::Osc.default_port() }
fn default_fft_size() -> usize { DEFAULT_FFT_SIZE }
fn default_samples_to_skip() -> usize { DEFAULT_SAMPLES_TO_SKIP }
fn default_time_info_cycle() -> usize { DEFAULT_TIME_INFO_CYCLE }

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TapError::Config(e.to_string()))
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        let network = &self.network;
        let host: IpAddr = network
            .host
            .parse()
            .map_err(|e| TapError::Config(format!("host {:?}: {}", network.host, e)))?;

        Ok(Endpoints {
            host,
            ports: [
                network.signal_level_port,
                network.instant_value_port,
                network.impulse_port,
                network.time_info_port,
                network.fft_port,
                network.osc_port,
            ],
            protocol: network.protocol,
            connect_timeout: Duration::from_millis(network.connect_timeout_ms),
        })
    }

    pub fn tap_settings(&self, sample_rate: f32) -> TapSettings {
        TapSettings {
            sample_rate,
            fft_size: self.analysis.fft_size,
            samples_to_skip: self.analysis.samples_to_skip,
            time_info_cycle: self.analysis.time_info_cycle,
            window_function: self.analysis.window,
            parameters: self.parameters.sanitized(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TapError::Config(format!("{}: {}", path.display(), e)))?;
    Config::parse(&content)
}
