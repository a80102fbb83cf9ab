//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.session.max_history_messages == 0 {
        errors.push("session.max_history_messages must be > 0".to_string());
    }
    if config.privatemode.api_base.trim().is_empty() {
        errors.push("privatemode.api_base must not be empty".to_string());
    }
    if config.privatemode.max_tokens == 0 {
        errors.push("privatemode.max_tokens must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.privatemode.temperature) {
        errors.push("privatemode.temperature must be in [0.0, 2.0]".to_string());
    }
    if config.privatemode.timeout_secs == 0 {
        errors.push("privatemode.timeout_secs must be > 0".to_string());
    }
    if config.signal.service.trim().is_empty() {
        errors.push("signal.service must not be empty".to_string());
    }

    finish(errors)
}

/// Additional checks that only apply when the Signal gateway is started.
pub fn validate_for_gateway(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.signal.phone_number.trim().is_empty() {
        errors.push(
            "signal.phone_number is required to run the gateway (set SIGNAL_PHONE_NUMBER)"
                .to_string(),
        );
    }

    finish(errors)
}

fn finish(errors: Vec<String>) -> crate::Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
