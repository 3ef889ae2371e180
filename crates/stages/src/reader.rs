use crate::Domains;
use sse_kv::RoTx;
use sse_primitives::{Account, Address, B256, Bytes, U256};
use sse_state::{StateError, StateReader};

/// [`StateReader`] over the flat domains within one KV transaction.
#[derive(Debug)]
pub struct DomainReader<'a, TX> {
    /// The transaction all reads go through.
    pub tx: &'a TX,
    /// The backing domains.
    pub domains: &'a Domains,
}

fn backend<E: std::error::Error + Send + Sync + 'static>(error: E) -> StateError {
    StateError::Backend(Box::new(error))
}

impl<TX: RoTx> StateReader for DomainReader<'_, TX> {
    fn read_account(&self, address: Address) -> Result<Option<Account>, StateError> {
        let Some((payload, _)) = self
            .domains
            .accounts
            .get_latest(self.tx, address.as_slice())
            .map_err(backend)?
        else {
            return Ok(None);
        };
        Account::decode_flat(&payload).map(Some).map_err(backend)
    }

    fn read_storage(&self, address: Address, slot: B256) -> Result<U256, StateError> {
        let mut key = [0u8; 52];
        key[..20].copy_from_slice(address.as_slice());
        key[20..].copy_from_slice(slot.as_slice());
        Ok(self
            .domains
            .storage
            .get_latest(self.tx, &key)
            .map_err(backend)?
            .map(|(payload, _)| U256::from_be_slice(&payload))
            .unwrap_or(U256::ZERO))
    }

    fn read_code(&self, code_hash: B256) -> Result<Bytes, StateError> {
        match self
            .domains
            .code
            .get_latest(self.tx, code_hash.as_slice())
            .map_err(backend)?
        {
            Some((payload, _)) => Ok(Bytes::from(payload)),
            None => Err(StateError::MissingCode(code_hash)),
        }
    }
}

/// Storage-domain key of `(address, slot)`.
pub(crate) fn storage_key(address: Address, slot: B256) -> [u8; 52] {
    let mut key = [0u8; 52];
    key[..20].copy_from_slice(address.as_slice());
    key[20..].copy_from_slice(slot.as_slice());
    key
}
