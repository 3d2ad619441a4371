//! Store-specific error types

use thiserror::Error;

/// Durable store failures. Fatal: local persistence itself is broken, so the
/// engine cannot honor its write guarantees.
#[derive(Error, Debug)]
pub enum StoreError {
	/// Database error
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	/// Serialization error
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
}
