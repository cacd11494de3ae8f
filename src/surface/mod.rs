//! Display surface configuration and registry.
//!
//! A surface is one independent display client (operator dashboard,
//! waiting-room monitor, announcement screen). Each is declared in its own
//! TOML file and drives its own synchronization engine.

use crate::error::{Error, Result};
use crate::model::{Lane, Turn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct SurfaceFile {
    surface: SurfaceConfig,
}

/// One display surface's settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    pub name: String,
    #[serde(default)]
    pub filter: SurfaceFilter,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Announcement surfaces cycle a featured called turn at this rate.
    #[serde(default)]
    pub rotation_interval_secs: Option<u64>,
    /// Whether new arrivals raise an alert on this surface.
    #[serde(default = "default_alerts")]
    pub alerts: bool,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_alerts() -> bool {
    true
}

impl SurfaceConfig {
    pub fn new(name: impl Into<String>, filter: SurfaceFilter) -> Self {
        Self {
            name: name.into(),
            filter,
            poll_interval_secs: default_poll_interval_secs(),
            rotation_interval_secs: None,
            alerts: default_alerts(),
        }
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_rotation(mut self, secs: u64) -> Self {
        self.rotation_interval_secs = Some(secs);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rotation_interval(&self) -> Option<Duration> {
        self.rotation_interval_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("surface name is empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(format!(
                "surface {}: poll_interval_secs must be positive",
                self.name
            )));
        }
        if self.rotation_interval_secs == Some(0) {
            return Err(Error::Config(format!(
                "surface {}: rotation_interval_secs must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Which turns a surface shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFilter {
    #[default]
    All,
    Billing,
    Appointments,
    /// Only turns already linked to a scheduled appointment.
    WithAppointment,
}

impl SurfaceFilter {
    pub fn matches(self, turn: &Turn) -> bool {
        match self {
            SurfaceFilter::All => true,
            SurfaceFilter::Billing => turn.lane() == Lane::Billing,
            SurfaceFilter::Appointments => turn.lane() == Lane::Appointments,
            SurfaceFilter::WithAppointment => turn.appointment.is_some(),
        }
    }

    /// Lane to request from the backend, when the filter maps onto one.
    pub fn server_lane(self) -> Option<Lane> {
        match self {
            SurfaceFilter::Billing => Some(Lane::Billing),
            SurfaceFilter::Appointments => Some(Lane::Appointments),
            SurfaceFilter::All | SurfaceFilter::WithAppointment => None,
        }
    }
}

/// Registry of configured surfaces, indexed by name.
pub struct SurfaceRegistry {
    surfaces: HashMap<String, SurfaceConfig>,
}

impl SurfaceRegistry {
    pub fn empty() -> Self {
        Self {
            surfaces: HashMap::new(),
        }
    }

    /// Load all `.toml` files from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut surfaces = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read surface dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let file: SurfaceFile = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("bad surface config {}: {e}", path.display()))
            })?;
            let config = file.surface;
            config.validate()?;
            if surfaces.contains_key(&config.name) {
                return Err(Error::Config(format!(
                    "surface {} declared twice (again in {})",
                    config.name,
                    path.display()
                )));
            }
            surfaces.insert(config.name.clone(), config);
        }

        Ok(Self { surfaces })
    }

    pub fn insert(&mut self, config: SurfaceConfig) {
        self.surfaces.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Option<&SurfaceConfig> {
        self.surfaces.get(name)
    }

    /// Surface names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.surfaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
