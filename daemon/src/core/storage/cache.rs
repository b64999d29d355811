use std::{num::NonZeroUsize, sync::Mutex};

use lru::LruCache;
use tessera_common::{amount::TokenId, token::Token};

/// Macro to initialize an LRU cache with a given size
#[macro_export]
macro_rules! init_cache {
    ($cache_size: expr) => {{
        Mutex::new(LruCache::new(
            NonZeroUsize::new($cache_size).unwrap_or(NonZeroUsize::MIN),
        ))
    }};
}

/// Read cache of committed records.
///
/// Only values read from the backend are cached, staged snapshot writes
/// always take precedence, and the cache is cleared whenever committed
/// state changes underneath it.
#[derive(Debug)]
pub struct StorageCache {
    pub tokens: Mutex<LruCache<TokenId, Token>>,
}

impl StorageCache {
    pub fn new(size: usize) -> Self {
        Self {
            tokens: init_cache!(size),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.clear();
        }
    }
}
