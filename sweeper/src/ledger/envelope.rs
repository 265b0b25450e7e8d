//! Transaction construction and signing
//!
//! Builds single-operation V1 transaction envelopes (claim a claimable
//! balance, or pay native asset) and signs them with the account's ed25519
//! key. Nothing in here touches the network.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    Asset as XdrAsset, BytesM, ClaimClaimableBalanceOp, ClaimableBalanceId, DecoratedSignature,
    Hash, Limits, Memo, MuxedAccount, Operation, OperationBody, PaymentOp, Preconditions,
    SequenceNumber, Signature, SignatureHint, TimeBounds, TimePoint, Transaction,
    TransactionEnvelope, TransactionExt, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV1Envelope, Uint256, WriteXdr,
};

use super::{AccountState, LedgerError, TxIntent};
use crate::config::ConfigError;

/// Signing key of the swept account
pub struct Keypair {
    signing_key: SigningKey,
    public_key: String,
}

impl Keypair {
    /// Decode an `S...` secret seed
    pub fn from_secret_seed(seed: &str) -> Result<Self, ConfigError> {
        let key = stellar_strkey::ed25519::PrivateKey::from_string(seed.trim())
            .map_err(|_| ConfigError::InvalidSecretKey("malformed secret seed".to_string()))?;
        Ok(Self::from_seed_bytes(key.0))
    }

    /// Keypair from raw ed25519 seed bytes
    pub fn from_seed_bytes(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key =
            stellar_strkey::ed25519::PublicKey(signing_key.verifying_key().to_bytes()).to_string();
        Self {
            signing_key,
            public_key,
        }
    }

    /// The `G...` account id
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    fn signature_hint(&self) -> [u8; 4] {
        let public = self.signing_key.verifying_key().to_bytes();
        [public[28], public[29], public[30], public[31]]
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Network identifier mixed into every signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkId([u8; 32]);

impl NetworkId {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }
}

/// Decode a `G...` account id into its raw key, validating the checksum
pub fn decode_account_id(address: &str) -> Option<[u8; 32]> {
    stellar_strkey::ed25519::PublicKey::from_string(address)
        .ok()
        .map(|key| key.0)
}

/// Validate a destination address supplied by configuration
pub fn validate_destination(address: &str) -> Result<String, ConfigError> {
    let trimmed = address.trim();
    match decode_account_id(trimmed) {
        Some(_) => Ok(trimmed.to_string()),
        None => Err(ConfigError::InvalidDestination(address.to_string())),
    }
}

/// A built transaction awaiting a signature
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    tx: Transaction,
    intent: TxIntent,
}

impl UnsignedTransaction {
    pub fn fee(&self) -> u32 {
        self.tx.fee
    }

    pub fn sequence(&self) -> i64 {
        self.tx.seq_num.0
    }

    /// Latest close time (unix seconds) at which the transaction is valid
    pub fn max_time(&self) -> Option<u64> {
        match &self.tx.cond {
            Preconditions::Time(bounds) => Some(bounds.max_time.0),
            _ => None,
        }
    }
}

/// A signed envelope ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Hex transaction hash
    pub hash: String,
    /// Base64 XDR of the transaction envelope
    pub envelope: String,
    /// What the transaction does
    pub intent: TxIntent,
}

fn encode_err(e: impl fmt::Display) -> LedgerError {
    LedgerError::Encode(e.to_string())
}

fn muxed_account(address: &str) -> Result<MuxedAccount, LedgerError> {
    decode_account_id(address)
        .map(|key| MuxedAccount::Ed25519(Uint256(key)))
        .ok_or_else(|| LedgerError::Encode(format!("invalid account id '{}'", address)))
}

/// Horizon balance ids are the hex XDR of a V0 claimable balance id
fn parse_balance_id(id: &str) -> Result<ClaimableBalanceId, LedgerError> {
    let bytes = hex::decode(id).map_err(|e| LedgerError::Encode(format!("balance id {}: {}", id, e)))?;
    if bytes.len() != 36 || bytes[..4] != [0, 0, 0, 0] {
        return Err(LedgerError::Encode(format!("unsupported balance id '{}'", id)));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[4..]);
    Ok(ClaimableBalanceId::ClaimableBalanceIdTypeV0(Hash(hash)))
}

fn operation_for(intent: &TxIntent) -> Result<Operation, LedgerError> {
    let body = match intent {
        TxIntent::Claim { balance_id } => {
            OperationBody::ClaimClaimableBalance(ClaimClaimableBalanceOp {
                balance_id: parse_balance_id(balance_id)?,
            })
        }
        TxIntent::Payment {
            destination,
            amount,
        } => {
            if !amount.is_positive() {
                return Err(LedgerError::Encode(format!("payment amount {} must be positive", amount)));
            }
            OperationBody::Payment(PaymentOp {
                destination: muxed_account(destination)?,
                asset: XdrAsset::Native,
                amount: amount.stroops(),
            })
        }
    };
    Ok(Operation {
        source_account: None,
        body,
    })
}

/// Build a single-operation transaction for `account` valid for `timeout_secs` from `now`
pub fn build_transaction(
    account: &AccountState,
    fee: u32,
    intent: &TxIntent,
    timeout_secs: u64,
    now: DateTime<Utc>,
) -> Result<UnsignedTransaction, LedgerError> {
    let sequence = account
        .sequence
        .checked_add(1)
        .ok_or_else(|| LedgerError::Encode("sequence number overflow".to_string()))?;
    let max_time = u64::try_from(now.timestamp()).map_err(encode_err)? + timeout_secs;

    let tx = Transaction {
        source_account: muxed_account(&account.account_id)?,
        fee,
        seq_num: SequenceNumber(sequence),
        cond: Preconditions::Time(TimeBounds {
            min_time: TimePoint(0),
            max_time: TimePoint(max_time),
        }),
        memo: Memo::None,
        operations: vec![operation_for(intent)?].try_into().map_err(encode_err)?,
        ext: TransactionExt::V0,
    };

    Ok(UnsignedTransaction {
        tx,
        intent: intent.clone(),
    })
}

/// Sign a built transaction for `network`
pub fn sign(
    unsigned: UnsignedTransaction,
    keypair: &Keypair,
    network: &NetworkId,
) -> Result<SignedTransaction, LedgerError> {
    let payload = TransactionSignaturePayload {
        network_id: Hash(network.0),
        tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(unsigned.tx.clone()),
    };
    let payload_xdr = payload.to_xdr(Limits::none()).map_err(encode_err)?;
    let hash: [u8; 32] = Sha256::digest(&payload_xdr).into();

    let signature = keypair.signing_key.sign(&hash);
    let signature_bytes: BytesM<64> = signature.to_bytes().to_vec().try_into().map_err(encode_err)?;
    let decorated = DecoratedSignature {
        hint: SignatureHint(keypair.signature_hint()),
        signature: Signature(signature_bytes),
    };

    let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
        tx: unsigned.tx,
        signatures: vec![decorated].try_into().map_err(encode_err)?,
    });
    let envelope_xdr = envelope.to_xdr(Limits::none()).map_err(encode_err)?;

    Ok(SignedTransaction {
        hash: hex::encode(hash),
        envelope: STANDARD.encode(envelope_xdr),
        intent: unsigned.intent,
    })
}
