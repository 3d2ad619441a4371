//! Engine configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path (database lives here)
	pub data_dir: PathBuf,

	/// Base URL of the remote API
	pub api_base_url: String,

	/// Bound on every individual remote call, in seconds
	pub request_timeout_secs: u64,

	/// Minimum dwell time between connectivity transitions, in milliseconds
	pub connectivity_dwell_ms: u64,

	/// First retry delay, in milliseconds; doubles per attempt
	pub backoff_base_ms: u64,

	/// Retry delay ceiling, in milliseconds
	pub backoff_cap_ms: u64,

	/// Attempts per sub-log before a persistent sync error is surfaced
	pub max_sync_attempts: u32,

	/// Logging level
	pub log_level: String,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			version: 1,
			data_dir: default_data_dir().unwrap_or_else(|_| PathBuf::from(".")),
			api_base_url: "http://localhost:3000/api".to_string(),
			request_timeout_secs: 10,
			connectivity_dwell_ms: 500,
			backoff_base_ms: 1_000,
			backoff_cap_ms: 30_000,
			max_sync_attempts: 5,
			log_level: "info".to_string(),
		}
	}
}

impl SyncConfig {
	/// Load configuration from the default location, creating it with
	/// defaults on first run
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory
	pub fn load_from(data_dir: &PathBuf) -> Result<Self> {
		let config_path = data_dir.join("taskdeck.json");

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: SyncConfig = serde_json::from_str(&json)?;
			config.data_dir = data_dir.clone();
			Ok(config)
		} else {
			let config = SyncConfig {
				data_dir: data_dir.clone(),
				..Default::default()
			};
			config.save()?;
			Ok(config)
		}
	}

	/// Persist the configuration to its data directory
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		let config_path = self.data_dir.join("taskdeck.json");
		let json = serde_json::to_string_pretty(self)?;
		fs::write(config_path, json)?;
		Ok(())
	}

	/// Path of the SQLite database inside the data directory
	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join("taskdeck.db")
	}
}

/// Platform data directory for the app
pub fn default_data_dir() -> Result<PathBuf> {
	dirs::data_dir()
		.map(|dir| dir.join("taskdeck"))
		.ok_or_else(|| anyhow!("could not determine platform data directory"))
}
