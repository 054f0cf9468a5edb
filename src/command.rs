use thiserror::Error;
use tracing::{info, warn};

use crate::operator::{
    generate_certs, CertificateBundle, FailurePolicy, PatchMethod, PatchOptions, SecretSpec,
    CA_FIELD,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("InvalidConfiguration: {0}")]
    InvalidConfiguration(String),
    #[error("no secret {namespace}/{secret} found")]
    NoSecret { secret: String, namespace: String },
    #[error("got secret {secret}, but it did not contain a '{field}' key")]
    MissingField { secret: String, field: String },
    #[error("MalformedObject: {0}")]
    MalformedObject(String),
    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: kube::Error,
    },
    #[error("Failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),
    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    #[error("UnableToGenerateCertificate: {0}")]
    UnableToGenerateCertificate(#[from] rcgen::Error),
    #[error("RandomSourceFailed: {0}")]
    RandomSource(#[from] rand::Error),
}

impl Error {
    /// The secret does not exist. `create` treats this as the signal to
    /// generate fresh material.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoSecret { .. })
    }
}

/// Named key/value store the generated material is kept in.
pub trait SecretStore {
    async fn get_field(
        &self,
        field: &str,
        secret_name: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, Error>;

    /// Creates the secret. Fails when it already exists.
    async fn save(&self, secret: &SecretSpec<'_>, bundle: CertificateBundle) -> Result<(), Error>;
}

pub trait Patcher {
    async fn get_ca_from_secret(
        &self,
        ca_name: &str,
        secret_name: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, Error>;

    async fn patch_objects(&self, options: PatchOptions) -> Result<(), Error>;
}

#[derive(Clone, Debug)]
pub struct CreateConfig {
    pub host: String,
    pub secret_name: String,
    pub secret_type: String,
    pub namespace: String,
    pub cert_name: String,
    pub key_name: String,
}

#[derive(Clone, Debug)]
pub struct PatchConfig {
    pub secret_name: String,
    pub namespace: String,
    pub ca_name: String,
    pub webhook_name: String,
    pub api_service_name: String,
    pub patch_validating: bool,
    pub patch_mutating: bool,
    pub patch_failure_policy: String,
    pub patch_mode: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Generates and stores a CA, certificate and key unless the secret is
/// already present.
pub async fn create(store: &impl SecretStore, config: &CreateConfig) -> Result<CreateOutcome, Error> {
    match store
        .get_field(CA_FIELD, &config.secret_name, &config.namespace)
        .await
    {
        Err(e) if e.is_not_found() => {
            info!(
                secret = %config.secret_name,
                namespace = %config.namespace,
                "creating new secret"
            );

            let bundle = generate_certs(&config.host)?;
            let secret = SecretSpec {
                name: &config.secret_name,
                namespace: &config.namespace,
                type_: &config.secret_type,
                cert_field: &config.cert_name,
                key_field: &config.key_name,
            };
            store.save(&secret, bundle).await?;
            Ok(CreateOutcome::Created)
        }
        Err(e) => Err(e),
        Ok(_) => {
            info!(
                secret = %config.secret_name,
                namespace = %config.namespace,
                "secret already exists"
            );
            Ok(CreateOutcome::AlreadyExists)
        }
    }
}

/// Reads the CA from the configured secret and patches it into the selected
/// webhook configurations and APIService.
pub async fn patch(patcher: &impl Patcher, config: &PatchConfig) -> Result<(), Error> {
    let options = patch_options(config)?;

    if !options.targets_anything() {
        warn!("webhook-name is empty and no APIService given, nothing to patch");
        return Ok(());
    }

    let ca_bundle = patcher
        .get_ca_from_secret(&config.ca_name, &config.secret_name, &config.namespace)
        .await?;

    patcher
        .patch_objects(PatchOptions {
            ca_bundle,
            ..options
        })
        .await?;

    info!("successfully patched webhooks");
    Ok(())
}

/// Turns the flag values into validated patch options, without a CA bundle.
fn patch_options(config: &PatchConfig) -> Result<PatchOptions, Error> {
    if !config.patch_mutating && !config.patch_validating && config.api_service_name.is_empty() {
        return Err(Error::InvalidConfiguration(
            "patch-validating=false, patch-mutating=false. You must patch at least one kind of webhook, otherwise this command is a no-op".into(),
        ));
    }

    let failure_policy = match config.patch_failure_policy.as_str() {
        "" => None,
        policy => Some(policy.parse::<FailurePolicy>()?),
    };
    let patch_method: PatchMethod = config.patch_mode.parse()?;

    let webhook_name = non_empty(&config.webhook_name);
    let options = PatchOptions {
        validating_webhook_name: webhook_name.clone().filter(|_| config.patch_validating),
        mutating_webhook_name: webhook_name.filter(|_| config.patch_mutating),
        api_service_name: non_empty(&config.api_service_name),
        failure_policy,
        ca_bundle: Vec::new(),
        patch_method,
    };
    options.validate()?;

    Ok(options)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
