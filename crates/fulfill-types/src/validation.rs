//! Configuration validation for pluggable implementations.
//!
//! Each storage or verifier implementation declares a [`Schema`] describing the
//! fields its TOML table may carry. The schema is checked before the
//! implementation is constructed so misconfiguration fails at startup.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
	/// A required field is absent.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// A field is present but its value is out of range or malformed.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	/// A field has the wrong TOML type.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	/// The table could not be deserialized into the implementation's config.
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Integer with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	/// Float with optional inclusive bounds. Integers are accepted.
	Float { min: Option<f64>, max: Option<f64> },
	Boolean,
	Array(Box<FieldType>),
	/// Table whose values all share one type (e.g. a map of sequences).
	Map(Box<FieldType>),
}

/// Extra check run after the type check passes.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field in a [`Schema`].
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Attaches a custom validator that runs after the type check.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of an implementation's TOML table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML table against this schema.
	///
	/// Unknown keys are ignored; only declared fields are checked.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn mismatch(field: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn out_of_range(field: &str, message: String) -> ValidationError {
	ValidationError::InvalidValue {
		field: field.to_string(),
		message,
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			value.as_str().ok_or_else(|| mismatch(name, "string", value))?;
		},
		FieldType::Boolean => {
			value.as_bool().ok_or_else(|| mismatch(name, "boolean", value))?;
		},
		FieldType::Integer { min, max } => {
			let v = value
				.as_integer()
				.ok_or_else(|| mismatch(name, "integer", value))?;
			if let Some(min) = min.filter(|min| v < *min) {
				return Err(out_of_range(name, format!("{} is less than minimum {}", v, min)));
			}
			if let Some(max) = max.filter(|max| v > *max) {
				return Err(out_of_range(name, format!("{} is greater than maximum {}", v, max)));
			}
		},
		FieldType::Float { min, max } => {
			let v = value
				.as_float()
				.or_else(|| value.as_integer().map(|i| i as f64))
				.ok_or_else(|| mismatch(name, "float", value))?;
			if let Some(min) = min.filter(|min| v < *min) {
				return Err(out_of_range(name, format!("{} is less than minimum {}", v, min)));
			}
			if let Some(max) = max.filter(|max| v > *max) {
				return Err(out_of_range(name, format!("{} is greater than maximum {}", v, max)));
			}
		},
		FieldType::Array(inner) => {
			let items = value.as_array().ok_or_else(|| mismatch(name, "array", value))?;
			for (i, item) in items.iter().enumerate() {
				check_type(&format!("{}[{}]", name, i), item, inner)?;
			}
		},
		FieldType::Map(inner) => {
			let table = value.as_table().ok_or_else(|| mismatch(name, "table", value))?;
			for (key, item) in table {
				check_type(&format!("{}.{}", name, key), item, inner)?;
			}
		},
	}

	Ok(())
}

/// A configuration schema that can validate a TOML table.
///
/// Implemented by every pluggable storage and verifier backend.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
