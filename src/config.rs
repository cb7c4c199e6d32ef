//! Runtime settings, read from the process environment (and `.env` when present).

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::inference::engine::{EngineOptions, DEFAULT_MODEL_ID};

pub const DEFAULT_API_KEY: &str = "default-secret-key";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Cpu,
    Cuda(usize),
}

impl FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.is_empty() || lower == "cpu" {
            return Ok(DevicePreference::Cpu);
        }
        if lower.starts_with("cuda") || lower.starts_with("gpu") {
            let ordinal = match trimmed.split_once(':') {
                Some((_, n)) => n
                    .parse::<usize>()
                    .map_err(|_| anyhow!("invalid CUDA ordinal in '{trimmed}'"))?,
                None => 0,
            };
            return Ok(DevicePreference::Cuda(ordinal));
        }
        Err(anyhow!("unrecognized device '{trimmed}' (expected cpu or cuda[:N])"))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    /// True when `API_KEY` was not set and the built-in key is in use.
    pub api_key_is_default: bool,
    pub bind_addr: SocketAddr,
    pub model_id: String,
    pub model_revision: String,
    pub device: DevicePreference,
    pub worker_threads: usize,
    pub seed: Option<u64>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (api_key, api_key_is_default) = match lookup("API_KEY") {
            Some(key) => (key, false),
            None => (DEFAULT_API_KEY.to_string(), true),
        };

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be host:port")?;

        let device = var("INFERENCE_DEVICE")
            .map(|v| v.parse::<DevicePreference>())
            .transpose()
            .context("INFERENCE_DEVICE")?
            .unwrap_or(DevicePreference::Cpu);

        let worker_threads = var("WORKER_THREADS")
            .map(|v| v.trim().parse::<usize>())
            .transpose()
            .context("WORKER_THREADS must be a positive integer")?
            .unwrap_or_else(num_cpus::get_physical)
            .max(1);

        let seed = var("GENERATION_SEED")
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .context("GENERATION_SEED must be an unsigned integer")?;

        Ok(Self {
            api_key,
            api_key_is_default,
            bind_addr,
            model_id: var("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            model_revision: var("MODEL_REVISION").unwrap_or_else(|| "main".to_string()),
            device,
            worker_threads,
            seed,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            model_id: self.model_id.clone(),
            revision: self.model_revision.clone(),
            device: self.device,
            seed: self.seed,
        }
    }
}
