use std::path::Path;

use crate::dm_registers::AuthType;
use crate::dm_rom::MAX_HARTS;
use crate::error::DmError;

/// Construction-time settings of a debug module.
///
/// Region sizes are fixed by the address map; only the number of harts the
/// halt table covers and the reported authentication type vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugModuleConfig {
	pub hart_limit: u32,
	pub auth_type: AuthType,
}

impl Default for DebugModuleConfig {
	fn default() -> Self {
		DebugModuleConfig {
			hart_limit: MAX_HARTS as u32,
			auth_type: AuthType::NoAuth,
		}
	}
}

fn parse_auth_type(name: &str) -> Option<AuthType> {
	match name.to_ascii_lowercase().as_str() {
		"noauth" | "none" => Some(AuthType::NoAuth),
		"password" => Some(AuthType::Password),
		"challenge" => Some(AuthType::Challenge),
		_ => None
	}
}

impl DebugModuleConfig {
	pub fn with_hart_limit(mut self, hart_limit: u32) -> Self {
		self.hart_limit = hart_limit;
		self
	}
	
	pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
		self.auth_type = auth_type;
		self
	}
	
	pub fn validate(&self) -> Result<(), DmError> {
		if self.hart_limit == 0 || self.hart_limit as usize > MAX_HARTS {
			return Err(DmError::InvalidConfig(format!("hart_limit must be within 1..={}, got {}", MAX_HARTS, self.hart_limit)));
		}
		Ok(())
	}
	
	/// Reads `{"hart_limit": 4, "auth_type": "noauth"}`. Missing fields keep
	/// their defaults.
	pub fn from_json(text: &str) -> Result<Self, DmError> {
		let parsed = json::parse(text)?;
		if ! parsed.is_object() {
			return Err(DmError::InvalidConfig("expected a JSON object".to_string()));
		}
		let mut config = Self::default();
		let hart_limit = &parsed["hart_limit"];
		if ! hart_limit.is_null() {
			config.hart_limit = hart_limit.as_u32().ok_or_else(|| DmError::InvalidConfig("hart_limit must be an unsigned integer".to_string()))?;
		}
		let auth_type = &parsed["auth_type"];
		if ! auth_type.is_null() {
			config.auth_type = auth_type.as_str()
				.and_then(parse_auth_type)
				.ok_or_else(|| DmError::InvalidConfig(format!("unknown auth_type {}", auth_type.dump())))?;
		}
		config.validate()?;
		Ok(config)
	}
	
	pub fn from_file(path: &Path) -> Result<Self, DmError> {
		let text = std::fs::read_to_string(path)?;
		Self::from_json(&text)
	}
}
