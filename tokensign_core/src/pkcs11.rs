//! 基于 cryptoki 的 PKCS#11 令牌实现

use crate::certificate::{decode_certificate, issuer_of};
use crate::error::{Error, Result};
use crate::token::{SecretCallback, TokenProvider, TokenSession};
use crate::types::{Certificate, DigestAlgorithm, KeyEntry};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

/// 通过 PKCS#11 动态库访问令牌
#[derive(Debug, Default)]
pub struct CryptokiProvider;

impl CryptokiProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TokenProvider for CryptokiProvider {
    fn open(
        &self,
        module: &Path,
        secrets: &mut dyn SecretCallback,
        slot_index: usize,
    ) -> Result<Box<dyn TokenSession>> {
        let device = |e: cryptoki::error::Error| Error::DeviceCommunication(e.to_string());

        let pkcs11 = Pkcs11::new(module).map_err(device)?;
        pkcs11.initialize(CInitializeArgs::OsThreads).map_err(device)?;

        let slots = pkcs11.get_slots_with_token().map_err(device)?;
        let slot = *slots.get(slot_index).ok_or_else(|| {
            Error::DeviceCommunication(format!("No token present in slot {}", slot_index))
        })?;

        let session = pkcs11.open_ro_session(slot).map_err(device)?;
        let pin = secrets.secret()?;
        session
            .login(UserType::User, Some(&AuthPin::new(pin)))
            .map_err(device)?;

        info!("Logged in to token in slot {}", slot_index);
        Ok(Box::new(CryptokiSession {
            session: Some(session),
            pkcs11: Some(pkcs11),
            handles: Vec::new(),
        }))
    }
}

struct CryptokiSession {
    session: Option<Session>,
    pkcs11: Option<Pkcs11>,
    /// 已枚举私钥的 (标识, 句柄, 密钥类型)
    handles: Vec<(String, ObjectHandle, KeyType)>,
}

impl CryptokiSession {
    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::DeviceCommunication("Session already closed".to_string()))
    }

    fn certificates(&self) -> Result<Vec<(Vec<u8>, Certificate)>> {
        let session = self.session()?;
        let handles = session
            .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
            .map_err(|e| Error::DeviceCommunication(e.to_string()))?;

        let mut certificates = Vec::new();
        for handle in handles {
            let attributes = session
                .get_attributes(handle, &[AttributeType::Id, AttributeType::Value])
                .map_err(|e| Error::DeviceCommunication(e.to_string()))?;

            let mut id = Vec::new();
            let mut value = None;
            for attribute in attributes {
                match attribute {
                    Attribute::Id(bytes) => id = bytes,
                    Attribute::Value(bytes) => value = Some(bytes),
                    _ => {}
                }
            }

            match value.map(|der| decode_certificate(&der)) {
                Some(Ok(certificate)) => certificates.push((id, certificate)),
                Some(Err(e)) => warn!("Skipping undecodable certificate object: {}", e),
                None => {}
            }
        }
        Ok(certificates)
    }

    fn private_key(&self, id: &[u8]) -> Result<Option<(ObjectHandle, KeyType)>> {
        let session = self.session()?;
        let handles = session
            .find_objects(&[
                Attribute::Class(ObjectClass::PRIVATE_KEY),
                Attribute::Id(id.to_vec()),
            ])
            .map_err(|e| Error::DeviceCommunication(e.to_string()))?;

        let handle = match handles.first() {
            Some(handle) => *handle,
            None => return Ok(None),
        };

        let attributes = session
            .get_attributes(handle, &[AttributeType::KeyType])
            .map_err(|e| Error::DeviceCommunication(e.to_string()))?;
        let key_type = attributes
            .into_iter()
            .find_map(|a| match a {
                Attribute::KeyType(key_type) => Some(key_type),
                _ => None,
            })
            .unwrap_or(KeyType::RSA);

        Ok(Some((handle, key_type)))
    }
}

impl TokenSession for CryptokiSession {
    fn list_keys(&mut self) -> Result<Vec<KeyEntry>> {
        let certificates = self.certificates()?;

        let mut keys = Vec::new();
        let mut handles = Vec::new();
        for (id, certificate) in &certificates {
            let Some((handle, key_type)) = self.private_key(id)? else {
                continue;
            };
            let chain = build_chain(certificate, &certificates);
            let entry = KeyEntry::new(certificate.clone(), chain);
            handles.push((entry.opaque_id.clone(), handle, key_type));
            keys.push(entry);
        }

        debug!("Enumerated {} keys", keys.len());
        self.handles = handles;
        Ok(keys)
    }

    fn sign(&mut self, data: &[u8], digest: DigestAlgorithm, key: &KeyEntry) -> Result<Vec<u8>> {
        let (_, handle, key_type) = self
            .handles
            .iter()
            .find(|(id, _, _)| *id == key.opaque_id)
            .cloned()
            .ok_or_else(|| Error::Signature(format!("Unknown key {}", key.opaque_id)))?;

        let session = self.session()?;
        let signed = match digest {
            DigestAlgorithm::Sha256 if key_type == KeyType::EC => {
                let hashed = Sha256::digest(data);
                session.sign(&Mechanism::Ecdsa, handle, &hashed)
            }
            DigestAlgorithm::Sha256 => session.sign(&Mechanism::Sha256RsaPkcs, handle, data),
        };
        signed.map_err(|e| Error::Signature(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.logout() {
                debug!("Logout failed: {}", e);
            }
        }
        self.pkcs11.take();
    }
}

/// 从令牌上的证书中按签发者逐级拼出证书链
fn build_chain(leaf: &Certificate, pool: &[(Vec<u8>, Certificate)]) -> Vec<Certificate> {
    let mut chain = vec![leaf.clone()];
    loop {
        let current = match chain.last().and_then(|c| issuer_of(c)) {
            Some(issuer) => issuer,
            None => break,
        };
        let next = pool.iter().map(|(_, c)| c).find(|candidate| {
            candidate.subject == current && !chain.iter().any(|c| c.der == candidate.der)
        });
        match next {
            Some(certificate) => chain.push(certificate.clone()),
            None => break,
        }
    }
    chain
}
