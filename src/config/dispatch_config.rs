//! config/dispatch_config.rs
//! Configuración global del servicio (puerto, base de datos, ritmo de la cola, timeouts).
//! Se lee de variables de entorno (cargadas antes desde .env); cada campo tiene default.

use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub bind_port: u16,
    /// Intervalo inicial entre envíos de la cola; se puede cambiar en caliente.
    pub queue_interval_ms: u64,
    pub queue_workers: usize,
    /// Timeout de cada llamada al proveedor
    pub provider_timeout_secs: u64,
    /// Cada cuánto se refresca el estado de todas las identidades
    pub status_sweep_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            database_url: "sqlite:data/dispatch.db?mode=rwc".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 5022,
            queue_interval_ms: 3_000,
            queue_workers: 1,
            provider_timeout_secs: 30,
            status_sweep_secs: 120,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        _ => Ok(default),
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self> {
        let d = DispatchConfig::default();
        Ok(DispatchConfig {
            database_url: env_or("DATABASE_URL", d.database_url)?,
            bind_addr: env_or("BIND_ADDR", d.bind_addr)?,
            bind_port: env_or("BIND_PORT", d.bind_port)?,
            queue_interval_ms: env_or("QUEUE_INTERVAL_MS", d.queue_interval_ms)?,
            queue_workers: env_or("QUEUE_WORKERS", d.queue_workers)?.max(1),
            provider_timeout_secs: env_or("PROVIDER_TIMEOUT_SECS", d.provider_timeout_secs)?,
            status_sweep_secs: env_or("STATUS_SWEEP_SECS", d.status_sweep_secs)?,
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn status_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.status_sweep_secs.max(1))
    }
}
