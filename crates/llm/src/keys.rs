//! Provider Credential Pools
//!
//! Each provider in the chain owns an ordered set of credentials. A key that
//! hits a quota failure is marked exhausted and the pool rotates round-robin
//! to the next key that is still usable. Exhausted keys stay exhausted for
//! the lifetime of the pool unless `reset_exhausted` is called explicitly.

use std::collections::HashSet;

/// One credential for one provider.
#[derive(Clone)]
pub struct ProviderKey {
    /// Masked identifier safe for logs and traces, e.g. `groq#2(...c9f1)`
    pub label: String,
    secret: String,
}

impl ProviderKey {
    pub fn new(provider: &str, index: usize, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let tail: String = {
            let chars: Vec<char> = secret.chars().collect();
            let start = chars.len().saturating_sub(4);
            chars[start..].iter().collect()
        };
        Self {
            label: format!("{}#{}(...{})", provider, index + 1, tail),
            secret,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKey")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// What a pool offers for the next call.
#[derive(Debug, Clone, Copy)]
pub enum KeySelection<'a> {
    Key(&'a ProviderKey),
    /// The provider needs no credential
    Keyless,
    /// Every key is exhausted, or none were configured
    Exhausted,
}

/// Ordered credentials of one provider plus rotation state.
#[derive(Debug, Clone)]
pub struct KeyPool {
    provider: String,
    keys: Vec<ProviderKey>,
    exhausted: HashSet<usize>,
    active: usize,
    /// Keyless providers (Ollama) have a single implicit slot
    keyless: bool,
}

impl KeyPool {
    pub fn new(provider: impl Into<String>, secrets: Vec<String>) -> Self {
        let provider = provider.into();
        let keys = secrets
            .into_iter()
            .enumerate()
            .map(|(i, s)| ProviderKey::new(&provider, i, s))
            .collect();
        Self {
            provider,
            keys,
            exhausted: HashSet::new(),
            active: 0,
            keyless: false,
        }
    }

    /// A pool for a provider that needs no credential.
    pub fn keyless(provider: impl Into<String>) -> Self {
        Self {
            keyless: true,
            ..Self::new(provider, Vec::new())
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        if self.keyless {
            1
        } else {
            self.keys.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_keyless(&self) -> bool {
        self.keyless
    }

    /// Index of the active slot, `None` once every slot is exhausted.
    pub fn active_index(&self) -> Option<usize> {
        if self.is_exhausted() {
            None
        } else {
            Some(self.active)
        }
    }

    /// The active credential.
    pub fn current(&self) -> KeySelection<'_> {
        if self.is_exhausted() {
            return KeySelection::Exhausted;
        }
        if self.keyless {
            return KeySelection::Keyless;
        }
        match self.keys.get(self.active) {
            Some(key) => KeySelection::Key(key),
            None => KeySelection::Exhausted,
        }
    }

    /// Label of the active slot for logs.
    pub fn current_label(&self) -> String {
        match self.current() {
            KeySelection::Key(key) => key.label.clone(),
            KeySelection::Keyless => format!("{}#keyless", self.provider),
            KeySelection::Exhausted => format!("{}#exhausted", self.provider),
        }
    }

    /// Mark the slot at `index` exhausted and, if it was the active one,
    /// rotate to the next usable slot.
    ///
    /// Rotation is round-robin: search continues after `index` and wraps to 0.
    /// Returns the active index afterwards, or `None` when the pool is spent.
    pub fn mark_exhausted(&mut self, index: usize) -> Option<usize> {
        let len = self.len();
        if index < len {
            self.exhausted.insert(index);
        }
        if len == 0 {
            return None;
        }
        if !self.exhausted.contains(&self.active) {
            return Some(self.active);
        }

        let next = (1..=len)
            .map(|step| (index + step) % len)
            .find(|i| !self.exhausted.contains(i));
        if let Some(next) = next {
            self.active = next;
        }
        next
    }

    /// Mark the currently active slot exhausted.
    pub fn exhaust_current(&mut self) -> Option<usize> {
        self.mark_exhausted(self.active)
    }

    pub fn is_exhausted(&self) -> bool {
        self.len() == 0 || self.exhausted.len() >= self.len()
    }

    pub fn exhausted_count(&self) -> usize {
        self.exhausted.len()
    }

    /// Make every key usable again and return to index 0.
    pub fn reset_exhausted(&mut self) {
        self.exhausted.clear();
        self.active = 0;
    }
}
