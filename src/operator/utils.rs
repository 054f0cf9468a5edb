use kube::api::{Patch, PatchParams, PostParams};
use kube::core::ResourceExt;
use kube::Api;
use kube::Client;
use kube::Resource;

use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// Field manager recorded on every write made by this tool.
pub const FIELD_MANAGER: &str = "kube-webhook-certgen";

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    }
}

/// Creates `value` in its own namespace. Fails when the object already exists.
pub async fn create_namespaced<T>(client: Client, value: &T) -> Result<T, kube::Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, &value.namespace().unwrap_or("default".into()));
    api.create(&post_params(), value).await
}

pub async fn perform_get<T>(client: Client, name: &str, namespace: &str) -> Result<T, kube::Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    let result = api.get(name).await?;
    Ok(result)
}

pub async fn perform_cluster_get<T>(client: Client, name: &str) -> Result<T, kube::Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = ClusterResourceScope>,
{
    let api: Api<T> = Api::all(client);
    let result = api.get(name).await?;
    Ok(result)
}

/// Replaces the cluster scoped object with `value`, including every field
/// the caller did not touch.
pub async fn replace_cluster<T>(client: Client, value: &T) -> Result<T, kube::Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = ClusterResourceScope>,
{
    let api: Api<T> = Api::all(client);
    api.replace(&value.name_any(), &post_params(), value).await
}

/// Server-side applies `document` to the cluster scoped object `name`,
/// taking ownership of every field it asserts.
pub async fn apply_cluster_fields<T>(
    client: Client,
    name: &str,
    document: &Value,
) -> Result<T, kube::Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = ClusterResourceScope>,
{
    let api: Api<T> = Api::all(client);
    let patch: Patch<&Value> = Patch::Apply(document);
    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await
}
