use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use tracing::debug;

use super::{create_namespaced, perform_get, K8s};
use crate::command::Error;

/// Secret key the CA certificate is always stored under.
pub const CA_FIELD: &str = "ca.crt";

impl K8s {
    /// Reads `field` from the secret `secret_name` in `namespace`.
    ///
    /// A missing secret is reported as [`Error::NoSecret`]; a secret without
    /// the field (or with an empty value) is a hard error.
    pub async fn get_secret_field(
        &self,
        field: &str,
        secret_name: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, Error> {
        debug!(secret = secret_name, namespace, field, "getting field from secret");

        let secret: Secret = perform_get(self.client.clone(), secret_name, namespace)
            .await
            .map_err(|source| match source {
                kube::Error::Api(ref response) if response.code == 404 => Error::NoSecret {
                    secret: secret_name.to_string(),
                    namespace: namespace.to_string(),
                },
                source => Error::Api {
                    context: format!("error getting secret {namespace}/{secret_name}"),
                    source,
                },
            })?;

        secret_field(secret, field)
    }

    pub async fn save_certs_to_secret(
        &self,
        secret: &SecretSpec<'_>,
        ca: Vec<u8>,
        cert: Vec<u8>,
        key: Vec<u8>,
    ) -> Result<(), Error> {
        debug!(
            secret = secret.name,
            namespace = secret.namespace,
            "saving certificates to secret"
        );

        let value = build_secret(secret, ca, cert, key);
        create_namespaced(self.client.clone(), &value)
            .await
            .map_err(|source| Error::Api {
                context: format!("error creating secret {}/{}", secret.namespace, secret.name),
                source,
            })?;

        debug!("successfully saved secret");
        Ok(())
    }
}

/// Where and how the generated material is written.
#[derive(Clone, Copy, Debug)]
pub struct SecretSpec<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub type_: &'a str,
    pub cert_field: &'a str,
    pub key_field: &'a str,
}

pub(crate) fn secret_field(secret: Secret, field: &str) -> Result<Vec<u8>, Error> {
    let secret_name = secret.metadata.name.clone().unwrap_or_default();
    match secret.data.and_then(|mut data| data.remove(field)) {
        Some(ByteString(value)) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingField {
            secret: secret_name,
            field: field.to_string(),
        }),
    }
}

fn build_secret(secret: &SecretSpec<'_>, ca: Vec<u8>, cert: Vec<u8>, key: Vec<u8>) -> Secret {
    let mut data: BTreeMap<String, ByteString> = BTreeMap::new();
    data.insert(CA_FIELD.into(), ByteString(ca));
    data.insert(secret.cert_field.into(), ByteString(cert));
    data.insert(secret.key_field.into(), ByteString(key));

    Secret {
        type_: Some(secret.type_.to_string()),
        metadata: ObjectMeta {
            name: Some(secret.name.to_string()),
            namespace: Some(secret.namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
