use capt_core::labels::Selector;
use kube::{
    api::{ListParams, Patch, PatchParams, PostParams},
    core::ErrorResponse,
    Api, Client,
};
use serde_json::json;

use super::{object_key, Error, Object, Result, Store};

const FIELD_MANAGER: &str = "capt-controller-manager";

/// A [`Store`] backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

/// Map the API server's status codes onto the store's error taxonomy
fn map_err<K: Object>(err: kube::Error, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ErrorResponse { code: 404, .. }) => Error::not_found::<K>(namespace, name),
        kube::Error::Api(ErrorResponse { code: 409, ref reason, .. }) if reason == "AlreadyExists" => {
            Error::already_exists::<K>(namespace, name)
        }
        kube::Error::Api(ErrorResponse { code: 409, .. }) => Error::conflict::<K>(namespace, name),
        err => Error::Kube(err),
    }
}

impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|err| map_err::<K>(err, namespace, name))
    }

    async fn list<K: Object>(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>> {
        let api = match namespace {
            Some(namespace) => self.api::<K>(namespace),
            None => Api::all(self.client.clone()),
        };
        let mut lp = ListParams::default();
        if !selector.selects_all() {
            lp = lp.labels(&selector.to_string());
        }
        let list = api.list(&lp).await.map_err(Error::Kube)?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|err| map_err::<K>(err, namespace, name))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|err| map_err::<K>(err, namespace, name))
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let mut value = serde_json::to_value(obj).map_err(Error::Serialization)?;
        let status = value
            .get_mut("status")
            .map(serde_json::Value::take)
            .unwrap_or_else(|| json!({}));
        // apply removes any status field this manager no longer sets
        let patch = json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": status,
        });
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
            .await
            .map_err(|err| map_err::<K>(err, namespace, name))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &Default::default())
            .await
            .map(|_| ())
            .map_err(|err| map_err::<K>(err, namespace, name))
    }
}
