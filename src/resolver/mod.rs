//! Address Resolver
//!
//! Turns a free-form recipient identifier into a [`ResolvedAddress`] for
//! one chain:
//! - names matching the configured grammar are looked up through a
//!   [`NameService`] on the chain's naming network, using the chain's coin
//!   type, and the returned bytes are re-encoded for the destination
//! - anything else must already be a valid native address for the chain
//!
//! Resolution has no side effects and its result is only meant for the
//! build step that immediately follows.

pub mod encoding;
pub mod ens;
pub mod name;

use async_trait::async_trait;
use std::sync::Arc;

use crate::chains::{ChainDescriptor, ChainRegistry};
use crate::error::{SendError, SendResult};
use crate::types::{AddressSource, ChainId, ResolvedAddress};
use crate::{log_debug, log_info};

pub use encoding::EncodingError;
pub use ens::EnsNameService;
pub use name::{NameGrammar, NormalizedName};

/// Source of raw address records for names
#[async_trait]
pub trait NameService: Send + Sync {
    /// Raw record bytes for `name` under `coin_type`, `None` when unset
    async fn resolve_record(
        &self,
        naming_chain: &ChainDescriptor,
        name: &NormalizedName,
        coin_type: u32,
    ) -> SendResult<Option<Vec<u8>>>;
}

/// Validate a native address for a chain without any lookup
pub fn resolve_native(descriptor: &ChainDescriptor, identifier: &str) -> SendResult<ResolvedAddress> {
    let (bytes, display) = encoding::parse_native(descriptor.address_encoding, identifier)
        .map_err(|e| {
            SendError::unresolvable_recipient(format!(
                "'{}' is not a valid {} address",
                identifier.trim(),
                descriptor.key
            ))
            .with_details(e.to_string())
        })?;
    Ok(ResolvedAddress::new(descriptor.chain_id, bytes, display, AddressSource::Native))
}

pub struct Resolver {
    registry: Arc<ChainRegistry>,
    names: Arc<dyn NameService>,
    grammar: NameGrammar,
}

impl Resolver {
    pub fn new(registry: Arc<ChainRegistry>, names: Arc<dyn NameService>, grammar: NameGrammar) -> Self {
        Self {
            registry,
            names,
            grammar,
        }
    }

    pub fn grammar(&self) -> &NameGrammar {
        &self.grammar
    }

    /// Resolve `identifier` for `chain_id`
    pub async fn resolve(&self, identifier: &str, chain_id: ChainId) -> SendResult<ResolvedAddress> {
        let descriptor = self.registry.get(chain_id)?;

        let name = match self.grammar.parse(identifier) {
            Some(name) => name,
            None => return resolve_native(descriptor, identifier),
        };

        let naming_chain = self.registry.get(descriptor.naming_chain_id).map_err(|_| {
            SendError::unresolvable_recipient(format!(
                "No naming network configured for {}",
                descriptor.key
            ))
        })?;

        log_debug!(
            "resolver",
            "Looking up name",
            name = name,
            chain = descriptor.key,
            coin_type = descriptor.name_coin_type,
        );

        let record = self
            .names
            .resolve_record(naming_chain, &name, descriptor.name_coin_type)
            .await?
            .ok_or_else(|| {
                SendError::unresolvable_recipient(format!(
                    "{} has no address record for {}",
                    name, descriptor.key
                ))
            })?;

        let display = encoding::encode_record(descriptor.address_encoding, &record).map_err(|e| {
            SendError::unresolvable_recipient(format!(
                "{} cannot be encoded as a {} address",
                name, descriptor.key
            ))
            .with_details(e.to_string())
        })?;

        log_info!("resolver", "Resolved name", name = name, address = display);

        Ok(ResolvedAddress::new(
            chain_id,
            record,
            display,
            AddressSource::Name(name.as_str().to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{BASE_SEPOLIA, BITCOIN_TESTNET, ETHEREUM_SEPOLIA};
    use crate::error::ErrorCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticNames {
        records: HashMap<(String, u32), Vec<u8>>,
        lookups: Mutex<Vec<(ChainId, String, u32)>>,
    }

    #[async_trait]
    impl NameService for StaticNames {
        async fn resolve_record(
            &self,
            naming_chain: &ChainDescriptor,
            name: &NormalizedName,
            coin_type: u32,
        ) -> SendResult<Option<Vec<u8>>> {
            self.lookups
                .lock()
                .unwrap()
                .push((naming_chain.chain_id, name.as_str().to_string(), coin_type));
            Ok(self.records.get(&(name.as_str().to_string(), coin_type)).cloned())
        }
    }

    fn resolver_with(records: &[(&str, u32, Vec<u8>)]) -> (Resolver, Arc<StaticNames>) {
        let mut names = StaticNames::default();
        for (name, coin, bytes) in records {
            names.records.insert((name.to_string(), *coin), bytes.clone());
        }
        let names = Arc::new(names);
        let registry = Arc::new(ChainRegistry::builtin().unwrap());
        (Resolver::new(registry, names.clone(), NameGrammar::default()), names)
    }

    #[tokio::test]
    async fn test_name_on_base_sepolia_keeps_bytes() {
        let record = hex::decode("abcd000000000000000000000000000000001234").unwrap();
        let (resolver, names) = resolver_with(&[("alice.eth", 2_147_568_180, record.clone())]);

        let resolved = resolver.resolve("alice.eth", BASE_SEPOLIA).await.unwrap();
        assert_eq!(resolved.chain_id(), 84532);
        assert_eq!(resolved.address_bytes(), record.as_slice());
        assert_eq!(resolved.source(), &AddressSource::Name("alice.eth".to_string()));

        let lookups = names.lookups.lock().unwrap();
        assert_eq!(lookups[0].0, ETHEREUM_SEPOLIA);
    }

    #[tokio::test]
    async fn test_missing_record_is_unresolvable() {
        let (resolver, _) = resolver_with(&[]);
        let err = resolver.resolve("nobody.eth", BASE_SEPOLIA).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvableRecipient);
    }

    #[tokio::test]
    async fn test_wrong_length_record_is_unresolvable() {
        let (resolver, _) = resolver_with(&[("short.eth", 2_147_568_180, vec![1, 2, 3])]);
        let err = resolver.resolve("short.eth", BASE_SEPOLIA).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvableRecipient);
    }

    #[tokio::test]
    async fn test_bitcoin_record_reencoded() {
        let script = hex::decode("0014751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        let (resolver, _) = resolver_with(&[("alice.eth", 0, script.clone())]);
        let resolved = resolver.resolve("alice.eth", BITCOIN_TESTNET).await.unwrap();
        assert_eq!(resolved.display_form(), "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx");
        assert_eq!(resolved.address_bytes(), script.as_slice());
    }

    #[tokio::test]
    async fn test_native_address_passes_through() {
        let (resolver, names) = resolver_with(&[]);
        let input = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let resolved = resolver.resolve(input, ETHEREUM_SEPOLIA).await.unwrap();
        assert_eq!(resolved.display_form(), input);
        assert_eq!(resolved.source(), &AddressSource::Native);
        assert!(names.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let (resolver, _) = resolver_with(&[]);
        let err = resolver.resolve("alice.eth", 137).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownChain);
    }

    #[tokio::test]
    async fn test_garbage_is_unresolvable() {
        let (resolver, _) = resolver_with(&[]);
        let err = resolver.resolve("not an address", BASE_SEPOLIA).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvableRecipient);
    }
}
