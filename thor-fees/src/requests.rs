//! Requests arriving from external apps.
//!
//! An app sends a base64 JSON envelope ([`DecodedRequest`]) whose `payload` is
//! encrypted for the wallet's session key. Decryption belongs to the session
//! layer; once decrypted the payload parses into a [`ParsedRequest`].

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blockchain::{Address, Clause};
use crate::config_store::NetworkConfig;
use crate::errors::{FeeError, FeeResult};
use crate::validation::InputValidator;

pub const EXTERNAL_APP_REQUEST_TYPE: &str = "external-app";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub app_name: String,
    pub app_url: String,
    pub genesis_id: String,
    pub nonce: String,
    /// Encrypted, base64
    pub payload: String,
    /// App's session public key, base64
    pub public_key: String,
}

impl DecodedRequest {
    /// Decode the base64 JSON form carried in deep links.
    pub fn decode(encoded: &str) -> FeeResult<Self> {
        let trimmed = encoded.trim();
        let bytes = STANDARD
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
            .map_err(|e| FeeError::ValidationError(format!("Request is not base64: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn encode(&self) -> FeeResult<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Reject requests that are malformed or meant for another network.
    pub fn validate(&self, validator: &InputValidator, network: &NetworkConfig) -> FeeResult<()> {
        if self.kind != EXTERNAL_APP_REQUEST_TYPE {
            return Err(FeeError::ValidationError(format!(
                "Unsupported request type {}",
                self.kind
            )));
        }
        validator.validate_label(&self.app_name)?;
        validator.validate_label(&self.app_url)?;
        validator.validate_block_id(&self.genesis_id)?;

        if !self.genesis_id.eq_ignore_ascii_case(&network.genesis_id) {
            return Err(FeeError::ValidationError(format!(
                "Request targets genesis {} but network {} is selected",
                self.genesis_id, network.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificatePurpose {
    Identification,
    Agreement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub purpose: CertificatePurpose,
    pub payload: CertificatePayload,
    #[serde(default)]
    pub signer: Option<Address>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegator {
    pub url: String,
    #[serde(default)]
    pub signer: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    /// Gas limit chosen by the app; estimated when absent
    #[serde(default)]
    pub gas: Option<u64>,
    #[serde(default)]
    pub delegator: Option<Delegator>,
    #[serde(default)]
    pub signer: Option<Address>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub clauses: Vec<Clause>,
    #[serde(default)]
    pub options: TransactionOptions,
}

impl TransactionRequest {
    pub fn is_delegated(&self) -> bool {
        self.options.delegator.is_some()
    }

    /// Gas to pass to estimation; zero means "estimate".
    pub fn provided_gas(&self) -> u64 {
        self.options.gas.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDataField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataRequest {
    pub domain: serde_json::Value,
    pub types: BTreeMap<String, Vec<TypedDataField>>,
    pub value: serde_json::Value,
    #[serde(default)]
    pub signer: Option<Address>,
}

/// Decrypted external-app payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ParsedRequest {
    SignCertificate(CertificateRequest),
    SignTransaction(TransactionRequest),
    SignTypedData(TypedDataRequest),
    Disconnect,
}

impl ParsedRequest {
    pub fn parse(payload: &str) -> FeeResult<Self> {
        let request: ParsedRequest = serde_json::from_str(payload)?;
        log::debug!("parsed external app request {}", request.method());
        Ok(request)
    }

    pub fn method(&self) -> &'static str {
        match self {
            ParsedRequest::SignCertificate(_) => "sign_certificate",
            ParsedRequest::SignTransaction(_) => "sign_transaction",
            ParsedRequest::SignTypedData(_) => "sign_typed_data",
            ParsedRequest::Disconnect => "disconnect",
        }
    }

    pub fn validate(&self, validator: &InputValidator) -> FeeResult<()> {
        match self {
            ParsedRequest::SignCertificate(cert) => {
                if cert.payload.content.is_empty() {
                    return Err(FeeError::ValidationError(
                        "Certificate content cannot be empty".to_string(),
                    ));
                }
                validator.validate_label(&cert.payload.kind)
            }
            ParsedRequest::SignTransaction(tx) => {
                if tx.clauses.is_empty() {
                    return Err(FeeError::ValidationError(
                        "Transaction has no clauses".to_string(),
                    ));
                }
                if let Some(delegator) = &tx.options.delegator {
                    validator.validate_label(&delegator.url)?;
                }
                Ok(())
            }
            ParsedRequest::SignTypedData(data) => {
                if data.types.is_empty() {
                    return Err(FeeError::ValidationError(
                        "Typed data has no types".to_string(),
                    ));
                }
                Ok(())
            }
            ParsedRequest::Disconnect => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Amount;
    use crate::config_store::TESTNET_GENESIS_ID;

    fn request() -> DecodedRequest {
        DecodedRequest {
            kind: EXTERNAL_APP_REQUEST_TYPE.to_string(),
            app_name: "Example".to_string(),
            app_url: "https://vechainwalletlink.example".to_string(),
            genesis_id: TESTNET_GENESIS_ID.to_string(),
            nonce: "ueEFd1s6WDTG/OjqaWj92YcX/NFcKOIu".to_string(),
            payload: "7sZ8dmuztg6ka7+O5ABZUBmI".to_string(),
            public_key: "duA8e5ns0Snx4jbbhkoy3Jf+OOv879mvxg76FCYfR3I=".to_string(),
        }
    }

    #[test]
    fn envelope_decodes_from_base64() {
        let encoded = request().encode().unwrap();
        let decoded = DecodedRequest::decode(&encoded).unwrap();
        assert_eq!(decoded, request());

        let json = serde_json::to_value(&decoded).unwrap();
        assert_eq!(json["type"], "external-app");
        assert_eq!(json["appName"], "Example");
        assert_eq!(json["genesisId"], TESTNET_GENESIS_ID);
    }

    #[test]
    fn envelope_rejects_garbage() {
        assert!(matches!(
            DecodedRequest::decode("not base64!"),
            Err(FeeError::ValidationError(_))
        ));
    }

    #[test]
    fn genesis_must_match_network() {
        let validator = InputValidator::new().unwrap();
        let req = request();
        assert!(req.validate(&validator, &NetworkConfig::testnet()).is_ok());

        let err = req.validate(&validator, &NetworkConfig::mainnet()).unwrap_err();
        assert!(matches!(err, FeeError::ValidationError(msg) if msg.contains("main")));
    }

    #[test]
    fn unknown_type_rejected() {
        let validator = InputValidator::new().unwrap();
        let mut req = request();
        req.kind = "wallet-connect".into();
        assert!(req.validate(&validator, &NetworkConfig::testnet()).is_err());
    }

    #[test]
    fn parses_transaction_request() {
        let payload = r#"{
            "method": "sign_transaction",
            "clauses": [
                {
                    "to": "0x0000000000000000000000000000456e65726779",
                    "value": "0x0",
                    "data": "0xa9059cbb0000000000000000000000007567d83b7b8d80addcb281a71d54fc7b3364ffed0000000000000000000000000000000000000000000000000de0b6b3a7640000"
                },
                { "to": "0x7567d83b7b8d80addcb281a71d54fc7b3364ffed", "value": 1000 }
            ],
            "options": {
                "gas": 90000,
                "delegator": { "url": "https://sponsor.example/delegate" }
            }
        }"#;

        let ParsedRequest::SignTransaction(tx) = ParsedRequest::parse(payload).unwrap() else {
            panic!("expected transaction request");
        };
        assert_eq!(tx.clauses.len(), 2);
        assert_eq!(tx.clauses[1].value, 1000);
        assert_eq!(
            tx.clauses[0].vtho_transfer_amount(),
            Some(Amount::from_vtho(1).unwrap())
        );
        assert!(tx.is_delegated());
        assert_eq!(tx.provided_gas(), 90_000);
    }

    #[test]
    fn parses_certificate_and_disconnect() {
        let cert = r#"{
            "method": "sign_certificate",
            "purpose": "identification",
            "payload": { "type": "text", "content": "Sign in to Example" }
        }"#;
        let parsed = ParsedRequest::parse(cert).unwrap();
        assert_eq!(parsed.method(), "sign_certificate");
        let validator = InputValidator::new().unwrap();
        assert!(parsed.validate(&validator).is_ok());

        let parsed = ParsedRequest::parse(r#"{"method":"disconnect"}"#).unwrap();
        assert_eq!(parsed, ParsedRequest::Disconnect);
    }

    #[test]
    fn parses_typed_data() {
        let payload = r#"{
            "method": "sign_typed_data",
            "domain": { "name": "Example", "version": "1" },
            "types": { "Mail": [ { "name": "contents", "type": "string" } ] },
            "value": { "contents": "hello" }
        }"#;
        let ParsedRequest::SignTypedData(data) = ParsedRequest::parse(payload).unwrap() else {
            panic!("expected typed data request");
        };
        assert_eq!(data.types["Mail"][0].kind, "string");
    }

    #[test]
    fn transaction_without_clauses_is_invalid() {
        let validator = InputValidator::new().unwrap();
        let parsed = ParsedRequest::parse(r#"{"method":"sign_transaction","clauses":[]}"#).unwrap();
        assert!(parsed.validate(&validator).is_err());
        assert!(ParsedRequest::parse(r#"{"method":"transfer"}"#).is_err());
    }
}
