use crate::errors::{FeeError, FeeResult};
use regex::Regex;

const MAX_INPUT_LEN: usize = 1000;

/// Input validation for values arriving from external apps
pub struct InputValidator {
    block_id_pattern: Regex,

    // Rejected in free-text fields such as dapp names
    malicious_patterns: Vec<Regex>,
}

fn compile(pattern: &str, what: &str) -> FeeResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| FeeError::ValidationError(format!("Invalid {} regex: {}", what, e)))
}

impl InputValidator {
    pub fn new() -> FeeResult<Self> {
        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|p| compile(p, "security"))
        .collect::<FeeResult<Vec<_>>>()?;

        Ok(InputValidator {
            block_id_pattern: compile(r"^0x[a-fA-F0-9]{64}$", "block id")?,
            malicious_patterns,
        })
    }

    /// Validate a 32-byte block or genesis id
    pub fn validate_block_id(&self, block_id: &str) -> FeeResult<()> {
        if !self.block_id_pattern.is_match(block_id) {
            return Err(FeeError::ValidationError(format!(
                "Invalid block id: {}",
                block_id
            )));
        }
        Ok(())
    }

    /// Validate a dapp-supplied label such as an app name
    pub fn validate_label(&self, label: &str) -> FeeResult<()> {
        self.check_basic_security(label)?;
        if label.trim().is_empty() {
            return Err(FeeError::ValidationError(
                "Label cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn check_basic_security(&self, input: &str) -> FeeResult<()> {
        if input.len() > MAX_INPUT_LEN {
            return Err(FeeError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        if self.malicious_patterns.iter().any(|p| p.is_match(&lowered)) {
            return Err(FeeError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new().unwrap()
    }

    #[test]
    fn test_block_id_validation() {
        let v = validator();
        assert!(v
            .validate_block_id(crate::config_store::MAINNET_GENESIS_ID)
            .is_ok());
        assert!(v.validate_block_id("0x1234").is_err());
    }

    #[test]
    fn test_malicious_label_rejected() {
        let v = validator();
        assert!(v.validate_label("VeBetter DAO").is_ok());
        assert!(v.validate_label("<script>alert(1)</script>").is_err());
        assert!(v.validate_label("   ").is_err());
    }
}
