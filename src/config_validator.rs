// Configuration validation module for the audio API
//
// Every environment parameter is described once in `CONFIG_PARAMS` (type,
// default, range, severity). Validation runs at startup, after the
// configuration file has been applied, so a bad value stops the server with a
// message naming the variable instead of silently falling back to a default.

use std::env;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use log::{error, info, warn};

/// Configuration parameter types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigType {
    String,
    UnsignedInteger,
    Boolean,
    IpAddress,
    Port,
    /// A file that should exist; checked as a warning only
    FilePath,
    Enum(&'static [&'static str]),
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationLevel {
    /// Must be valid for the server to start
    Critical,
    /// Reported as a warning
    Warning,
}

/// Configuration parameter definition
#[derive(Debug, Clone)]
pub struct ConfigParam {
    pub name: &'static str,
    pub description: &'static str,
    pub param_type: ConfigType,
    pub default_value: &'static str,
    pub validation_level: ValidationLevel,
    pub min_value: Option<u64>,
    pub max_value: Option<u64>,
}

const fn param(
    name: &'static str,
    description: &'static str,
    param_type: ConfigType,
    default_value: &'static str,
) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type,
        default_value,
        validation_level: ValidationLevel::Critical,
        min_value: None,
        max_value: None,
    }
}

const fn ranged(
    name: &'static str,
    description: &'static str,
    default_value: &'static str,
    min_value: u64,
    max_value: u64,
) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type: ConfigType::UnsignedInteger,
        default_value,
        validation_level: ValidationLevel::Critical,
        min_value: Some(min_value),
        max_value: Some(max_value),
    }
}

const fn optional_file(
    name: &'static str,
    description: &'static str,
    default_value: &'static str,
) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type: ConfigType::FilePath,
        default_value,
        validation_level: ValidationLevel::Warning,
        min_value: None,
        max_value: None,
    }
}

/// Every parameter read by the server
pub const CONFIG_PARAMS: &[ConfigParam] = &[
    // Server
    param(
        "AUDIO_API_HOST",
        "Host IP address for the API server",
        ConfigType::IpAddress,
        "127.0.0.1",
    ),
    param("AUDIO_API_PORT", "Port for the API server", ConfigType::Port, "8181"),
    ranged("AUDIO_API_TIMEOUT", "Client disconnect timeout in seconds", "480", 1, 3600),
    ranged("AUDIO_API_KEEPALIVE", "Keep-alive timeout in seconds", "480", 1, 3600),
    ranged("AUDIO_API_WORKERS", "HTTP workers (0 = CPU count)", "0", 0, 256),
    // Handlers
    param(
        "AUDIO_API_TMP_FILES",
        "Directory for temporary audio files",
        ConfigType::String,
        "./tmp",
    ),
    ranged(
        "AUDIO_API_MAX_FILE_SIZE",
        "Maximum upload size in bytes",
        "31457280",
        1,
        4_294_967_296,
    ),
    param(
        "AUDIO_API_FALLBACK_INPUT",
        "Text spoken when a speech request has no input",
        ConfigType::String,
        "Hello, this is a test of the speech endpoint.",
    ),
    param(
        "AUDIO_API_MANIFESTS_DIR",
        "Directory of synthesis model configurations",
        ConfigType::String,
        "./manifests",
    ),
    optional_file(
        "AUDIO_API_DEFAULT_MODEL_CONFIG",
        "Synthesis model configuration used by default",
        "./manifests/default.json",
    ),
    // Engine cache
    ranged(
        "AUDIO_API_ENGINE_TTL_SECONDS",
        "Idle time after which a synthesis engine is released",
        "1500",
        1,
        604_800,
    ),
    ranged(
        "AUDIO_API_ENGINE_SWEEP_SECONDS",
        "Interval of the idle engine sweep (0 = lazy eviction only)",
        "60",
        0,
        86_400,
    ),
    // Transcoding
    param("AUDIO_API_FFMPEG_PATH", "ffmpeg executable", ConfigType::String, "ffmpeg"),
    ranged(
        "AUDIO_API_TRANSCODE_TIMEOUT_SECONDS",
        "Maximum duration of one ffmpeg run",
        "120",
        1,
        3600,
    ),
    // Transcription
    param(
        "AUDIO_API_WHISPER_CMD",
        "whisper.cpp command-line executable",
        ConfigType::String,
        "whisper-cli",
    ),
    optional_file(
        "AUDIO_API_WHISPER_MODEL",
        "whisper.cpp ggml model file",
        "ggml-base-q5_1.bin",
    ),
    param(
        "AUDIO_API_WHISPER_LANGUAGE",
        "Spoken language, 'auto' to detect",
        ConfigType::String,
        "auto",
    ),
    ranged("AUDIO_API_WHISPER_THREADS", "Threads used by whisper.cpp", "4", 1, 256),
    // Metrics
    param(
        "AUDIO_API_METRICS_ENABLED",
        "Enable metrics collection",
        ConfigType::Boolean,
        "true",
    ),
    param(
        "AUDIO_API_METRICS_BACKEND",
        "Metrics backend type",
        ConfigType::Enum(&["prometheus", "none", "null", "disabled"]),
        "prometheus",
    ),
];

/// Configuration validation errors with detailed context
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub error_type: ConfigErrorType,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigErrorType {
    InvalidValue,
    InvalidFormat,
    InvalidRange,
    FileNotFound,
}

impl ConfigValidationError {
    fn new(
        field: &str,
        value: &str,
        error_type: ConfigErrorType,
        message: &str,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            error_type,
            message: message.to_string(),
            suggestion,
        }
    }
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Configuration error in '{}' ({:?}): {} (value: '{}')",
            self.field, self.error_type, self.message, self.value
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " - Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result type for configuration validation
pub type ValidationResult<T> = Result<T, ConfigValidationError>;

/// Configuration validation results
#[derive(Debug, Default)]
pub struct ValidationResults {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResults {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn print_summary(&self) {
        if !self.errors.is_empty() {
            error!(
                "Configuration validation found {} error(s):",
                self.errors.len()
            );
            for (i, err) in self.errors.iter().enumerate() {
                error!("  {}. {}", i + 1, err);
            }
        }

        if !self.warnings.is_empty() {
            warn!(
                "Configuration validation found {} warning(s):",
                self.warnings.len()
            );
            for (i, warning) in self.warnings.iter().enumerate() {
                warn!("  {}. {}", i + 1, warning);
            }
        }

        if self.is_valid() && self.warnings.is_empty() {
            info!("Configuration validation passed successfully");
        } else if self.is_valid() {
            info!(
                "Configuration validation passed with {} warning(s)",
                self.warnings.len()
            );
        }
    }
}

/// Helper functions for common validation patterns
pub mod validators {
    use super::*;

    /// Validate boolean values from string
    pub fn validate_boolean(field: &str, value: &str) -> ValidationResult<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidValue,
                "Invalid boolean value",
                Some("Use 'true' or 'false'".to_string()),
            )),
        }
    }

    /// Validate unsigned integer values with optional range
    pub fn validate_unsigned(
        field: &str,
        value: &str,
        min: Option<u64>,
        max: Option<u64>,
    ) -> ValidationResult<u64> {
        let parsed = value.trim().parse::<u64>().map_err(|_| {
            ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid unsigned integer format",
                Some("Use a non-negative whole number".to_string()),
            )
        })?;

        let below = min.is_some_and(|min| parsed < min);
        let above = max.is_some_and(|max| parsed > max);
        if below || above {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                "Value out of range",
                Some(format!(
                    "Use a value between {} and {}",
                    min.unwrap_or(0),
                    max.map_or_else(|| "unbounded".to_string(), |max| max.to_string())
                )),
            ));
        }
        Ok(parsed)
    }

    /// Validate IP address
    pub fn validate_ip_address(field: &str, value: &str) -> ValidationResult<IpAddr> {
        IpAddr::from_str(value.trim()).map_err(|_| {
            ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid IP address format",
                Some("Use a valid IPv4 or IPv6 address (e.g., 127.0.0.1 or ::1)".to_string()),
            )
        })
    }

    /// Validate port number
    pub fn validate_port(field: &str, value: &str) -> ValidationResult<u16> {
        let port = value.trim().parse::<u16>().map_err(|_| {
            ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid port number format",
                Some("Use a number between 1 and 65535".to_string()),
            )
        })?;
        if port == 0 {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                "Port number cannot be 0",
                Some("Use a port between 1 and 65535".to_string()),
            ));
        }
        Ok(port)
    }

    /// Validate a value against a fixed set, case-insensitively
    pub fn validate_enum(
        field: &str,
        value: &str,
        valid_values: &[&str],
    ) -> ValidationResult<String> {
        let normalized = value.trim().to_lowercase();
        if valid_values.contains(&normalized.as_str()) {
            Ok(normalized)
        } else {
            Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidValue,
                "Unsupported value",
                Some(format!("Use one of: {}", valid_values.join(", "))),
            ))
        }
    }

    /// Validate that a file exists
    pub fn validate_file_exists(field: &str, value: &str) -> ValidationResult<()> {
        if Path::new(value).is_file() {
            Ok(())
        } else {
            Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::FileNotFound,
                "File does not exist",
                Some("Ensure the file exists and the path is correct".to_string()),
            ))
        }
    }
}

/// Validates the process configuration
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate every parameter, reading values from the environment
    pub fn validate() -> ValidationResults {
        Self::validate_with(|name| env::var(name).ok())
    }

    /// Validate every parameter, reading values through `lookup`
    pub fn validate_with<F>(lookup: F) -> ValidationResults
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut results = ValidationResults::default();

        for param in CONFIG_PARAMS {
            let value = lookup(param.name).unwrap_or_else(|| param.default_value.to_string());
            if let Err(e) = Self::validate_parameter(param, &value) {
                match param.validation_level {
                    ValidationLevel::Critical => results.errors.push(e),
                    ValidationLevel::Warning => results.warnings.push(e),
                }
            }
        }

        Self::validate_cross_dependencies(&mut results, &lookup);
        results
    }

    fn validate_parameter(param: &ConfigParam, value: &str) -> ValidationResult<()> {
        match param.param_type {
            ConfigType::String => {
                if value.trim().is_empty() {
                    return Err(ConfigValidationError::new(
                        param.name,
                        value,
                        ConfigErrorType::InvalidValue,
                        "Value cannot be empty",
                        Some(format!("Unset {} to use '{}'", param.name, param.default_value)),
                    ));
                }
            }
            ConfigType::UnsignedInteger => {
                validators::validate_unsigned(param.name, value, param.min_value, param.max_value)?;
            }
            ConfigType::Boolean => {
                validators::validate_boolean(param.name, value)?;
            }
            ConfigType::IpAddress => {
                validators::validate_ip_address(param.name, value)?;
            }
            ConfigType::Port => {
                validators::validate_port(param.name, value)?;
            }
            ConfigType::FilePath => validators::validate_file_exists(param.name, value)?,
            ConfigType::Enum(valid_values) => {
                validators::validate_enum(param.name, value, valid_values)?;
            }
        }
        Ok(())
    }

    /// Validate cross-parameter dependencies
    fn validate_cross_dependencies<F>(results: &mut ValidationResults, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let ttl = number("AUDIO_API_ENGINE_TTL_SECONDS", 1500);
        let sweep = number("AUDIO_API_ENGINE_SWEEP_SECONDS", 60);
        if sweep > ttl {
            results.warnings.push(ConfigValidationError::new(
                "AUDIO_API_ENGINE_SWEEP_SECONDS",
                &sweep.to_string(),
                ConfigErrorType::InvalidRange,
                "Sweep interval is longer than the engine TTL; idle engines outlive their TTL",
                Some(format!("Use a sweep interval of at most {} seconds", ttl)),
            ));
        }

        let manifests = lookup("AUDIO_API_MANIFESTS_DIR").unwrap_or_else(|| "./manifests".to_string());
        if !Path::new(&manifests).is_dir() {
            results.warnings.push(ConfigValidationError::new(
                "AUDIO_API_MANIFESTS_DIR",
                &manifests,
                ConfigErrorType::FileNotFound,
                "Directory does not exist; every speech request will use the default model",
                Some("Create the directory and add <model>.json configurations".to_string()),
            ));
        }
    }
}
