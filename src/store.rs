//! Namespace-scoped store for host-cluster resources
//!
//! Wraps the kube client with a typed Get/Create/Update/List surface over the
//! resources this service touches, all scoped to the host-operator namespace.
//! Services depend on the [`SignupStore`] trait so tests can substitute the
//! in-memory fake.

use async_trait::async_trait;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;

use crate::crd::{BannedUser, ProxyPlugin, SocialEvent, Space, SpaceBinding, UserSignup};

/// A store operation failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The API server rejected the update with a resource-version conflict
    #[error("{0}")]
    Conflict(String),

    /// A transient server-side failure worth retrying
    #[error("{0}")]
    Transient(String),

    /// Any other API failure
    #[error("{0}")]
    Api(String),
}

impl StoreError {
    /// Whether the optimistic-update loop should retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Transient(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        if let kube::Error::Api(response) = &e {
            if response.code == 409 {
                return StoreError::Conflict(e.to_string());
            }
            if response.code == 429 || response.code >= 500 {
                return StoreError::Transient(e.to_string());
            }
        }
        StoreError::Api(e.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed, namespace-scoped access to the host cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignupStore: Send + Sync {
    /// Namespace all resources live in
    fn namespace(&self) -> &str;

    /// Fetch a UserSignup by name
    async fn get_user_signup(&self, name: &str) -> StoreResult<Option<UserSignup>>;

    /// Create a UserSignup
    async fn create_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup>;

    /// Replace a UserSignup; conflicts surface as [`StoreError::Conflict`]
    async fn update_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup>;

    /// List UserSignups matching a label selector (`k=v,k2=v2`)
    async fn list_user_signups(&self, label_selector: &str) -> StoreResult<Vec<UserSignup>>;

    /// List BannedUsers matching a label selector
    async fn list_banned_users(&self, label_selector: &str) -> StoreResult<Vec<BannedUser>>;

    /// Fetch a SocialEvent by name
    async fn get_social_event(&self, name: &str) -> StoreResult<Option<SocialEvent>>;

    /// Fetch a Space by name
    async fn get_space(&self, name: &str) -> StoreResult<Option<Space>>;

    /// List SpaceBindings matching a label selector
    async fn list_space_bindings(&self, label_selector: &str) -> StoreResult<Vec<SpaceBinding>>;

    /// Fetch a ProxyPlugin by name
    async fn get_proxy_plugin(&self, name: &str) -> StoreResult<Option<ProxyPlugin>>;
}

/// Production store backed by the in-cluster kube client.
pub struct KubeSignupStore {
    client: Client,
    namespace: String,
}

impl KubeSignupStore {
    /// Create a store scoped to the given namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
        K: serde::de::DeserializeOwned + Clone + std::fmt::Debug,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl SignupStore for KubeSignupStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_user_signup(&self, name: &str) -> StoreResult<Option<UserSignup>> {
        Ok(self.api::<UserSignup>().get_opt(name).await?)
    }

    async fn create_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup> {
        Ok(self
            .api::<UserSignup>()
            .create(&PostParams::default(), signup)
            .await?)
    }

    async fn update_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup> {
        let name = signup
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Api("usersignup has no name".to_string()))?;
        Ok(self
            .api::<UserSignup>()
            .replace(name, &PostParams::default(), signup)
            .await?)
    }

    async fn list_user_signups(&self, label_selector: &str) -> StoreResult<Vec<UserSignup>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<UserSignup>().list(&params).await?.items)
    }

    async fn list_banned_users(&self, label_selector: &str) -> StoreResult<Vec<BannedUser>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<BannedUser>().list(&params).await?.items)
    }

    async fn get_social_event(&self, name: &str) -> StoreResult<Option<SocialEvent>> {
        Ok(self.api::<SocialEvent>().get_opt(name).await?)
    }

    async fn get_space(&self, name: &str) -> StoreResult<Option<Space>> {
        Ok(self.api::<Space>().get_opt(name).await?)
    }

    async fn list_space_bindings(&self, label_selector: &str) -> StoreResult<Vec<SpaceBinding>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<SpaceBinding>().list(&params).await?.items)
    }

    async fn get_proxy_plugin(&self, name: &str) -> StoreResult<Option<ProxyPlugin>> {
        Ok(self.api::<ProxyPlugin>().get_opt(name).await?)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory store used by unit tests.
    //!
    //! Label selectors of the form `k=v,k2=v2` are matched against resource
    //! labels; update failures can be injected to exercise the retry loop.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use kube::ResourceExt;

    use super::*;

    /// In-memory [`SignupStore`]
    #[derive(Default)]
    pub struct FakeStore {
        /// UserSignups by name
        pub signups: Mutex<BTreeMap<String, UserSignup>>,
        /// BannedUsers
        pub banned: Mutex<Vec<BannedUser>>,
        /// SocialEvents by name
        pub events: Mutex<BTreeMap<String, SocialEvent>>,
        /// Spaces by name
        pub spaces: Mutex<BTreeMap<String, Space>>,
        /// SpaceBindings
        pub bindings: Mutex<Vec<SpaceBinding>>,
        /// ProxyPlugins by name
        pub plugins: Mutex<BTreeMap<String, ProxyPlugin>>,
        /// Error injected into every update
        pub fail_update: Mutex<Option<StoreError>>,
        /// Error injected into every get
        pub fail_get: Mutex<Option<StoreError>>,
        /// Error injected into banned-user lists
        pub fail_list_banned: Mutex<Option<StoreError>>,
        /// Error injected into create
        pub fail_create: Mutex<Option<StoreError>>,
        /// Number of conflicts to report before an update succeeds
        pub conflicts_before_success: Mutex<u32>,
    }

    impl FakeStore {
        /// Empty store
        pub fn new() -> Self {
            Self::default()
        }

        /// Store with the given UserSignups preloaded
        pub fn with_signups(signups: Vec<UserSignup>) -> Self {
            let store = Self::new();
            {
                let mut map = store.signups.lock().unwrap();
                for s in signups {
                    map.insert(s.name_any(), s);
                }
            }
            store
        }

        /// Add a social event
        pub fn add_event(&self, event: SocialEvent) {
            self.events.lock().unwrap().insert(event.name_any(), event);
        }

        /// Add a banned user
        pub fn add_banned(&self, banned: BannedUser) {
            self.banned.lock().unwrap().push(banned);
        }

        /// Add a space
        pub fn add_space(&self, space: Space) {
            self.spaces.lock().unwrap().insert(space.name_any(), space);
        }

        /// Add a space binding
        pub fn add_binding(&self, binding: SpaceBinding) {
            self.bindings.lock().unwrap().push(binding);
        }

        /// Add a proxy plugin
        pub fn add_plugin(&self, plugin: ProxyPlugin) {
            self.plugins.lock().unwrap().insert(plugin.name_any(), plugin);
        }

        /// Fetch a stored signup by name
        pub fn signup(&self, name: &str) -> Option<UserSignup> {
            self.signups.lock().unwrap().get(name).cloned()
        }
    }

    fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
        if selector.is_empty() {
            return true;
        }
        let Some(labels) = labels else { return false };
        selector.split(',').all(|pair| {
            let Some((key, value)) = pair.split_once('=') else {
                return false;
            };
            labels.get(key.trim()).map(String::as_str) == Some(value.trim())
        })
    }

    #[async_trait]
    impl SignupStore for FakeStore {
        fn namespace(&self) -> &str {
            "kubesaw-host-operator"
        }

        async fn get_user_signup(&self, name: &str) -> StoreResult<Option<UserSignup>> {
            if let Some(e) = self.fail_get.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(self.signups.lock().unwrap().get(name).cloned())
        }

        async fn create_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup> {
            if let Some(e) = self.fail_create.lock().unwrap().clone() {
                return Err(e);
            }
            let mut map = self.signups.lock().unwrap();
            let name = signup.name_any();
            if map.contains_key(&name) {
                return Err(StoreError::Api(format!("usersignup {} already exists", name)));
            }
            map.insert(name, signup.clone());
            Ok(signup.clone())
        }

        async fn update_user_signup(&self, signup: &UserSignup) -> StoreResult<UserSignup> {
            if let Some(e) = self.fail_update.lock().unwrap().clone() {
                return Err(e);
            }
            {
                let mut remaining = self.conflicts_before_success.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Conflict("the object has been modified".to_string()));
                }
            }
            let mut map = self.signups.lock().unwrap();
            let name = signup.name_any();
            if !map.contains_key(&name) {
                return Err(StoreError::Api(format!("usersignup {} not found", name)));
            }
            map.insert(name, signup.clone());
            Ok(signup.clone())
        }

        async fn list_user_signups(&self, label_selector: &str) -> StoreResult<Vec<UserSignup>> {
            Ok(self
                .signups
                .lock()
                .unwrap()
                .values()
                .filter(|s| matches_selector(s.metadata.labels.as_ref(), label_selector))
                .cloned()
                .collect())
        }

        async fn list_banned_users(&self, label_selector: &str) -> StoreResult<Vec<BannedUser>> {
            if let Some(e) = self.fail_list_banned.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(self
                .banned
                .lock()
                .unwrap()
                .iter()
                .filter(|b| matches_selector(b.metadata.labels.as_ref(), label_selector))
                .cloned()
                .collect())
        }

        async fn get_social_event(&self, name: &str) -> StoreResult<Option<SocialEvent>> {
            Ok(self.events.lock().unwrap().get(name).cloned())
        }

        async fn get_space(&self, name: &str) -> StoreResult<Option<Space>> {
            Ok(self.spaces.lock().unwrap().get(name).cloned())
        }

        async fn list_space_bindings(&self, label_selector: &str) -> StoreResult<Vec<SpaceBinding>> {
            Ok(self
                .bindings
                .lock()
                .unwrap()
                .iter()
                .filter(|b| matches_selector(b.metadata.labels.as_ref(), label_selector))
                .cloned()
                .collect())
        }

        async fn get_proxy_plugin(&self, name: &str) -> StoreResult<Option<ProxyPlugin>> {
            Ok(self.plugins.lock().unwrap().get(name).cloned())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::crd::UserSignupSpec;

        #[tokio::test]
        async fn test_selector_matching() {
            let store = FakeStore::new();
            let mut signup = UserSignup::new("u1", UserSignupSpec::default());
            signup.set_label("kubesaw.dev/state", "approved");
            signup.set_label("kubesaw.dev/phone-number-hash", "abc");
            store.signups.lock().unwrap().insert("u1".to_string(), signup);

            let hits = store
                .list_user_signups("kubesaw.dev/state=approved,kubesaw.dev/phone-number-hash=abc")
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);

            let misses = store
                .list_user_signups("kubesaw.dev/state=approved,kubesaw.dev/phone-number-hash=zzz")
                .await
                .unwrap();
            assert!(misses.is_empty());
        }

        #[tokio::test]
        async fn test_conflicts_then_success() {
            let store = FakeStore::new();
            let signup = UserSignup::new("u1", UserSignupSpec::default());
            store.signups.lock().unwrap().insert("u1".to_string(), signup.clone());
            *store.conflicts_before_success.lock().unwrap() = 2;

            assert!(matches!(
                store.update_user_signup(&signup).await,
                Err(StoreError::Conflict(_))
            ));
            assert!(matches!(
                store.update_user_signup(&signup).await,
                Err(StoreError::Conflict(_))
            ));
            assert!(store.update_user_signup(&signup).await.is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_retryability() {
        assert!(StoreError::Conflict("conflict".into()).is_retryable());
        assert!(StoreError::Transient("unavailable".into()).is_retryable());
        assert!(!StoreError::Api("bad request".into()).is_retryable());
    }
}
