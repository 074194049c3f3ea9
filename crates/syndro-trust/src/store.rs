use async_trait::async_trait;

/// The secret-protected key/value store the host app wires in (spec §6).
/// Implementations live outside this crate's scope (wrapped OS keychain,
/// encrypted preferences, etc); this trait is the only contract the core
/// cryptography relies on.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, key: &str) -> Option<String>;
    async fn write(&self, key: &str, value: String);
    async fn delete(&self, key: &str);
}

/// Plain (non-secret) host preferences, used for the auto-accept-trusted
/// toggle and device nicknames.
#[async_trait]
pub trait Preferences: Send + Sync {
    async fn get_bool(&self, key: &str) -> Option<bool>;
    async fn set_bool(&self, key: &str, value: bool);
    async fn get_string(&self, key: &str) -> Option<String>;
    async fn set_string(&self, key: &str, value: String);
}
