use std::fmt;
use std::fmt::Debug;
use std::str::FromStr;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use k8s_openapi::{ByteString, ClusterResourceScope};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{apply_cluster_fields, perform_cluster_get, replace_cluster, K8s};
use crate::command::Error;

/// Admission failure policy written to every webhook entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    Ignore,
    Fail,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "Ignore",
            FailurePolicy::Fail => "Fail",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ignore" => Ok(FailurePolicy::Ignore),
            "Fail" => Ok(FailurePolicy::Fail),
            other => Err(Error::InvalidConfiguration(format!(
                "patch-failure-policy {other} is not valid, must be 'Ignore' or 'Fail'"
            ))),
        }
    }
}

/// How webhook configurations are written back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchMethod {
    /// Full object replacement of the fetched configuration.
    Update,
    /// Server-side apply of the CA bundle and failure policy fields only.
    Apply,
}

impl fmt::Display for PatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatchMethod::Update => write!(f, "update"),
            PatchMethod::Apply => write!(f, "patch"),
        }
    }
}

impl FromStr for PatchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(PatchMethod::Update),
            "patch" => Ok(PatchMethod::Apply),
            other => Err(Error::InvalidConfiguration(format!(
                "invalid patch method '{other}', must be 'patch' or 'update'"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchOptions {
    pub validating_webhook_name: Option<String>,
    pub mutating_webhook_name: Option<String>,
    pub api_service_name: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub ca_bundle: Vec<u8>,
    pub patch_method: PatchMethod,
}

impl PatchOptions {
    /// Rejects option sets that cannot be applied. Runs before any request
    /// is sent to the cluster.
    pub fn validate(&self) -> Result<(), Error> {
        let has_validating = self.validating_webhook_name.is_some();
        let has_mutating = self.mutating_webhook_name.is_some();

        if self.failure_policy.is_some() && !has_validating && !has_mutating {
            return Err(Error::InvalidConfiguration(
                "failurePolicy specified, but no webhook will be patched".into(),
            ));
        }

        if let (Some(validating), Some(mutating)) =
            (&self.validating_webhook_name, &self.mutating_webhook_name)
        {
            if validating != mutating {
                return Err(Error::InvalidConfiguration(
                    "mutating and validating webhook names must be the same".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn targets_anything(&self) -> bool {
        self.validating_webhook_name.is_some()
            || self.mutating_webhook_name.is_some()
            || self.api_service_name.is_some()
    }

    fn webhook_name(&self) -> Option<&str> {
        self.validating_webhook_name
            .as_deref()
            .or(self.mutating_webhook_name.as_deref())
    }
}

/// Cluster scoped object holding a list of admission webhooks.
pub trait WebhookConfiguration:
    Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Resource<Scope = ClusterResourceScope, DynamicType = ()>
{
    fn webhook_names(&self) -> Vec<String>;

    /// Sets the CA bundle on every entry, and the failure policy when given.
    fn set_ca_bundle(&mut self, ca: &[u8], failure_policy: Option<FailurePolicy>);
}

macro_rules! webhook_configuration {
    ($kind:ty) => {
        impl WebhookConfiguration for $kind {
            fn webhook_names(&self) -> Vec<String> {
                self.webhooks
                    .iter()
                    .flatten()
                    .map(|webhook| webhook.name.clone())
                    .collect()
            }

            fn set_ca_bundle(&mut self, ca: &[u8], failure_policy: Option<FailurePolicy>) {
                for webhook in self.webhooks.iter_mut().flatten() {
                    webhook.client_config.ca_bundle = Some(ByteString(ca.to_vec()));
                    if let Some(policy) = failure_policy {
                        webhook.failure_policy = Some(policy.to_string());
                    }
                }
            }
        }
    };
}

webhook_configuration!(ValidatingWebhookConfiguration);
webhook_configuration!(MutatingWebhookConfiguration);

/// Builds the server-side apply document for `hook`. Only the entry names
/// (the list merge key), the CA bundle and the failure policy are asserted.
fn apply_document<K: WebhookConfiguration>(
    name: &str,
    hook: &K,
    ca: &[u8],
    failure_policy: Option<FailurePolicy>,
) -> Value {
    let webhooks: Vec<Value> = hook
        .webhook_names()
        .into_iter()
        .map(|webhook| {
            let mut entry = json!({
                "name": webhook,
                "clientConfig": {
                    "caBundle": ByteString(ca.to_vec()),
                }
            });
            if let Some(policy) = failure_policy {
                entry["failurePolicy"] = json!(policy.as_str());
            }
            entry
        })
        .collect();

    json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "metadata": {
            "name": name,
        },
        "webhooks": webhooks,
    })
}

fn set_api_service_ca(api_service: &mut APIService, ca: &[u8]) -> Result<(), Error> {
    let name = api_service.metadata.name.clone().unwrap_or_default();
    let spec = api_service
        .spec
        .as_mut()
        .ok_or_else(|| Error::MalformedObject(format!("APIService {name} has no spec")))?;
    spec.ca_bundle = Some(ByteString(ca.to_vec()));
    spec.insecure_skip_tls_verify = Some(false);
    Ok(())
}

impl K8s {
    /// Patches the APIService and webhook configurations named in `options`.
    ///
    /// Order is APIService, then validating, then mutating. The first failure
    /// aborts the remaining steps; steps already written are kept.
    pub async fn patch_cluster_objects(&self, options: &PatchOptions) -> Result<(), Error> {
        options.validate()?;

        if let Some(name) = &options.api_service_name {
            self.patch_api_service(name, &options.ca_bundle).await?;
        }

        let Some(configuration_name) = options.webhook_name() else {
            return Ok(());
        };

        info!(
            configuration_name,
            patch_validating = options.validating_webhook_name.is_some(),
            patch_mutating = options.mutating_webhook_name.is_some(),
            failure_policy = options.failure_policy.map(|p| p.as_str()).unwrap_or(""),
            patch_method = %options.patch_method,
            "patching webhook configurations"
        );

        if options.validating_webhook_name.is_some() {
            self.patch_webhook_configuration::<ValidatingWebhookConfiguration>(
                configuration_name,
                options,
            )
            .await?;
        } else {
            debug!("validating hook patching not required");
        }

        if options.mutating_webhook_name.is_some() {
            self.patch_webhook_configuration::<MutatingWebhookConfiguration>(
                configuration_name,
                options,
            )
            .await?;
        } else {
            debug!("mutating hook patching not required");
        }

        info!("successfully patched webhook configuration(s)");
        Ok(())
    }

    async fn patch_api_service(&self, name: &str, ca: &[u8]) -> Result<(), Error> {
        info!(api_service = name, "patching APIService");

        let mut api_service: APIService = perform_cluster_get(self.client.clone(), name)
            .await
            .map_err(|source| Error::Api {
                context: format!("error getting APIService {name}"),
                source,
            })?;

        set_api_service_ca(&mut api_service, ca)?;

        replace_cluster(self.client.clone(), &api_service)
            .await
            .map_err(|source| Error::Api {
                context: format!("error patching APIService {name}"),
                source,
            })?;

        debug!("successfully patched APIService");
        Ok(())
    }

    async fn patch_webhook_configuration<K: WebhookConfiguration>(
        &self,
        name: &str,
        options: &PatchOptions,
    ) -> Result<(), Error> {
        let kind = K::kind(&()).to_string();

        let mut hook: K = perform_cluster_get(self.client.clone(), name)
            .await
            .map_err(|source| Error::Api {
                context: format!("failed getting {kind} {name}"),
                source,
            })?;

        let written = match options.patch_method {
            PatchMethod::Update => {
                hook.set_ca_bundle(&options.ca_bundle, options.failure_policy);
                replace_cluster(self.client.clone(), &hook).await
            }
            PatchMethod::Apply => {
                let document =
                    apply_document(name, &hook, &options.ca_bundle, options.failure_policy);
                apply_cluster_fields::<K>(self.client.clone(), name, &document).await
            }
        };
        written.map_err(|source| Error::Api {
            context: format!("failed patching {kind} {name}"),
            source,
        })?;

        debug!(kind = %kind, name, method = %options.patch_method, "successfully patched webhook configuration");
        Ok(())
    }
}
