//! Action signing for the exchange endpoint.
//!
//! Every write action is hashed together with its nonce into a
//! "connection id", wrapped in the exchange's Agent struct, and signed
//! as EIP-712 typed data against a fixed off-chain domain.

use std::str::FromStr;

use alloy_primitives::{keccak256, Address};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use serde_json::json;

use crate::error::{EngineError, Result};

/// Off-chain signing domain. These constants are fixed by the exchange
/// and are not related to any deployed contract.
const DOMAIN_NAME: &[u8] = b"Exchange";
const DOMAIN_VERSION: &[u8] = b"1";
const DOMAIN_CHAIN_ID: u64 = 1337;
const AGENT_SOURCE: &[u8] = b"a";

/// Signs exchange actions with a local private key.
pub struct ActionSigner {
    signer: PrivateKeySigner,
}

impl ActionSigner {
    pub fn new(private_key: &str) -> Result<Self> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = PrivateKeySigner::from_str(pk)
            .map_err(|e| EngineError::Signing(format!("invalid private key: {}", e)))?;

        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign an action and wrap it into a complete exchange request body.
    pub async fn sign_action(
        &self,
        action: &serde_json::Value,
        nonce: u64,
    ) -> Result<serde_json::Value> {
        let connection_id = Self::connection_id(action, nonce)?;
        let struct_hash = Self::agent_hash(&connection_id);
        let domain_hash = Self::domain_separator();

        // keccak256("\x19\x01" + domainSeparator + structHash)
        let mut message = vec![0x19, 0x01];
        message.extend_from_slice(&domain_hash);
        message.extend_from_slice(&struct_hash);
        let final_hash = keccak256(&message);

        let signature = self
            .signer
            .sign_hash(&final_hash)
            .await
            .map_err(|e| EngineError::Signing(e.to_string()))?;

        let bytes = signature.as_bytes();
        let v = if bytes[64] < 27 { bytes[64] as u64 + 27 } else { bytes[64] as u64 };

        Ok(json!({
            "action": action,
            "nonce": nonce,
            "signature": {
                "r": format!("0x{}", hex::encode(&bytes[0..32])),
                "s": format!("0x{}", hex::encode(&bytes[32..64])),
                "v": v,
            },
            "vaultAddress": null,
        }))
    }

    /// Hash of the serialized action, its nonce, and the no-vault
    /// indicator byte. Ties the signature to this exact action.
    fn connection_id(action: &serde_json::Value, nonce: u64) -> Result<[u8; 32]> {
        let mut data = serde_json::to_vec(action)?;
        data.extend_from_slice(&nonce.to_be_bytes());
        data.push(0x00);
        Ok(keccak256(&data).0)
    }

    /// EIP-712 struct hash for Agent(string source,bytes32 connectionId).
    fn agent_hash(connection_id: &[u8; 32]) -> [u8; 32] {
        let type_hash = keccak256(b"Agent(string source,bytes32 connectionId)");
        let source_hash = keccak256(AGENT_SOURCE);

        let mut encoded = Vec::with_capacity(96);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(source_hash.as_slice());
        encoded.extend_from_slice(connection_id);

        keccak256(&encoded).0
    }

    fn domain_separator() -> [u8; 32] {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let name_hash = keccak256(DOMAIN_NAME);
        let version_hash = keccak256(DOMAIN_VERSION);

        let mut chain_id = [0u8; 32];
        chain_id[24..].copy_from_slice(&DOMAIN_CHAIN_ID.to_be_bytes());

        let verifying_contract = [0u8; 32]; // zero address, left-padded

        let mut encoded = Vec::with_capacity(160);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(name_hash.as_slice());
        encoded.extend_from_slice(version_hash.as_slice());
        encoded.extend_from_slice(&chain_id);
        encoded.extend_from_slice(&verifying_contract);

        keccak256(&encoded).0
    }
}
