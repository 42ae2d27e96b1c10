use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Opaque per-key data handed to the access-control callback.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// One shared secret the server accepts.
#[derive(Clone)]
pub struct KeyRecord {
    secret: Arc<[u8]>,
    user_data: Option<UserData>,
}

impl KeyRecord {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            user_data: None,
        }
    }

    /// Attach data that identifies the key holder to the ACL.
    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field(
                "secret",
                &format_args!("<redacted:{} bytes>", self.secret.len()),
            )
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Registered keys, tried in registration order.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: RwLock<Vec<Arc<KeyRecord>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: KeyRecord) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(key));
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First key for which `matches` holds.
    pub fn find(&self, mut matches: impl FnMut(&KeyRecord) -> bool) -> Option<Arc<KeyRecord>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|key| matches(key))
            .cloned()
    }
}
