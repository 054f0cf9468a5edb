mod certificate;
mod secret;
mod utils;
mod webhook;

#[cfg(test)]
pub(crate) mod test_server;

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::command::{Error, Patcher, SecretStore};

pub use certificate::{generate_certs, CertificateBundle};
pub use secret::{SecretSpec, CA_FIELD};
pub use webhook::{FailurePolicy, PatchMethod, PatchOptions};

#[cfg(test)]
pub(crate) use secret::secret_field;
#[cfg(test)]
pub(crate) use webhook::WebhookConfiguration;

pub use utils::{
    apply_cluster_fields, create_namespaced, perform_cluster_get, perform_get, replace_cluster,
};

/// Cluster backed implementation of the secret store and patcher.
pub struct K8s {
    client: Client,
}

impl K8s {
    pub fn new(client: Client) -> K8s {
        K8s { client }
    }

    /// Connects with the given kubeconfig, or with the in-cluster / default
    /// kubeconfig when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<K8s, Error> {
        let client = match kubeconfig {
            Some(path) => {
                debug!(kubeconfig = %path.display(), "loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(K8s::new(client))
    }
}

impl SecretStore for K8s {
    async fn get_field(
        &self,
        field: &str,
        secret_name: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, Error> {
        self.get_secret_field(field, secret_name, namespace).await
    }

    async fn save(&self, secret: &SecretSpec<'_>, bundle: CertificateBundle) -> Result<(), Error> {
        self.save_certs_to_secret(secret, bundle.ca, bundle.cert, bundle.key)
            .await
    }
}

impl Patcher for K8s {
    async fn get_ca_from_secret(
        &self,
        ca_name: &str,
        secret_name: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, Error> {
        self.get_secret_field(ca_name, secret_name, namespace).await
    }

    async fn patch_objects(&self, options: PatchOptions) -> Result<(), Error> {
        self.patch_cluster_objects(&options).await
    }
}
