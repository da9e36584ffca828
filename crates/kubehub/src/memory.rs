//! In-memory [`ManagedObjectClient`] for tests and dry runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kubetink_core::{ManagedObject, ObjectKey, ObjectKind};

use crate::{ClientError, ManagedObjectClient};

/// One recorded client call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ObjectKey),
    Get(ObjectKey),
    List(ObjectKind, Option<String>),
    Delete(ObjectKey),
}

/// Scripted answer for a `get`, consumed before the stored state is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Report NotFound even if the object is stored (creation not yet visible).
    NotFound,
    /// Fail with a transport-style error.
    Error(String),
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManagedObject>,
    created: Vec<ObjectKey>,
    calls: Vec<Call>,
    create_faults: HashMap<ObjectKey, String>,
    reads: HashMap<ObjectKey, VecDeque<ReadOutcome>>,
}

/// Object store with duplicate detection and fault injection.
#[derive(Default)]
pub struct MemoryObjectClient {
    state: Mutex<State>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `obj` without recording a call, as if it pre-existed.
    pub fn seed(&self, obj: ManagedObject) {
        self.lock().objects.insert(obj.key(), obj);
    }

    /// Make every create of `key` fail with `message` until cleared.
    pub fn fail_create(&self, key: ObjectKey, message: impl Into<String>) {
        self.lock().create_faults.insert(key, message.into());
    }

    /// Queue scripted answers for the next gets of `key`.
    pub fn script_reads(&self, key: ObjectKey, outcomes: impl IntoIterator<Item = ReadOutcome>) {
        self.lock().reads.entry(key).or_default().extend(outcomes);
    }

    pub fn clear_faults(&self) {
        let mut st = self.lock();
        st.create_faults.clear();
        st.reads.clear();
    }

    /// Keys of successful creates, in order.
    pub fn created(&self) -> Vec<ObjectKey> {
        self.lock().created.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn objects(&self) -> Vec<ManagedObject> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_scope(key: &ObjectKey) -> Result<(), ClientError> {
    if key.kind.is_namespaced() && key.namespace.is_none() {
        return Err(ClientError::MissingNamespace(key.kind));
    }
    Ok(())
}

#[async_trait::async_trait]
impl ManagedObjectClient for MemoryObjectClient {
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError> {
        let key = obj.key();
        let mut st = self.lock();
        st.calls.push(Call::Create(key.clone()));
        check_scope(&key)?;
        if let Some(message) = st.create_faults.get(&key) {
            return Err(ClientError::Rejected { key: key.clone(), message: message.clone() });
        }
        if st.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(key));
        }
        st.objects.insert(key.clone(), obj.clone());
        st.created.push(key);
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, ClientError> {
        let mut st = self.lock();
        st.calls.push(Call::Get(key.clone()));
        check_scope(key)?;
        match st.reads.get_mut(key).and_then(VecDeque::pop_front) {
            Some(ReadOutcome::NotFound) => return Err(ClientError::NotFound(key.clone())),
            Some(ReadOutcome::Error(message)) => return Err(ClientError::Rejected { key: key.clone(), message }),
            None => {}
        }
        st.objects.get(key).cloned().ok_or_else(|| ClientError::NotFound(key.clone()))
    }

    async fn list(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Vec<ManagedObject>, ClientError> {
        let mut st = self.lock();
        st.calls.push(Call::List(kind, namespace.map(str::to_string)));
        Ok(st
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind && (namespace.is_none() || k.namespace.as_deref() == namespace))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let mut st = self.lock();
        st.calls.push(Call::Delete(key.clone()));
        st.objects.remove(key).map(drop).ok_or_else(|| ClientError::NotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnsureOutcome;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ns(name: &str) -> ManagedObject {
        ManagedObject::Namespace(Namespace {
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            ..Default::default()
        })
    }

    fn cm(namespace: Option<&str>, name: &str) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: namespace.map(Into::into), ..Default::default() },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let c = MemoryObjectClient::new();
        c.create(&ns("tinkerbell")).await.unwrap();
        let err = c.create(&ns("tinkerbell")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(c.created().len(), 1);
    }

    #[tokio::test]
    async fn ensure_suppresses_already_exists_only() {
        let c = MemoryObjectClient::new();
        assert_eq!(c.ensure(&ns("a")).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(c.ensure(&ns("a")).await.unwrap(), EnsureOutcome::AlreadyPresent);

        let key = ObjectKey::cluster(ObjectKind::Namespace, "b");
        c.fail_create(key, "quota exceeded");
        assert!(matches!(c.ensure(&ns("b")).await, Err(ClientError::Rejected { .. })));
    }

    #[tokio::test]
    async fn namespaced_kind_requires_namespace() {
        let c = MemoryObjectClient::new();
        let err = c.create(&cm(None, "nginx-conf")).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingNamespace(ObjectKind::ConfigMap)));
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn scripted_reads_precede_state() {
        let c = MemoryObjectClient::new();
        c.seed(ns("tinkerbell"));
        let key = ObjectKey::cluster(ObjectKind::Namespace, "tinkerbell");
        c.script_reads(key.clone(), [ReadOutcome::NotFound, ReadOutcome::Error("boom".into())]);
        assert!(c.get(&key).await.unwrap_err().is_not_found());
        assert!(matches!(c.get(&key).await, Err(ClientError::Rejected { .. })));
        assert!(c.get(&key).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_namespace() {
        let c = MemoryObjectClient::new();
        c.seed(cm(Some("a"), "x"));
        c.seed(cm(Some("b"), "y"));
        c.seed(ns("a"));
        assert_eq!(c.list(ObjectKind::ConfigMap, None).await.unwrap().len(), 2);
        assert_eq!(c.list(ObjectKind::ConfigMap, Some("a")).await.unwrap().len(), 1);
        let key = ObjectKey::namespaced(ObjectKind::ConfigMap, "a", "x");
        c.delete(&key).await.unwrap();
        assert!(c.delete(&key).await.unwrap_err().is_not_found());
    }
}
