use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser};
use tracing::error;

mod command;
mod logging;
mod operator;

use command::{CreateConfig, Error, PatchConfig};
use logging::{LogFormat, LogLevel};
use operator::{K8s, CA_FIELD};

/// Create certificates and patch them to admission hooks
#[derive(Parser)]
#[command(name = "kube-webhook-certgen")]
#[command(bin_name = "kube-webhook-certgen")]
#[command(arg_required_else_help = true)]
enum WebhookCertgenCli {
    /// Generate a ca and server cert+key and store the results in a secret 'secret-name' in 'namespace'
    Create(CreateArgs),
    /// Patch a ValidatingWebhookConfiguration, MutatingWebhookConfiguration or APIService
    /// 'object-name' by using the ca from 'secret-name' in 'namespace'
    Patch(PatchArgs),
    /// Prints the CLI version information
    Version,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to kubeconfig file: e.g. ~/.kube/kind-config-kind
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Args, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CreateArgs {
    /// Comma-separated hostnames and IPs to generate a certificate for
    #[arg(long)]
    host: String,
    /// Name of the secret where certificate information will be written
    #[arg(long)]
    secret_name: String,
    /// Namespace of the secret where certificate information will be written
    #[arg(long)]
    namespace: String,
    /// Name of cert file in the secret
    #[arg(long, default_value = "cert")]
    cert_name: String,
    /// Name of key file in the secret
    #[arg(long, default_value = "key")]
    key_name: String,
    /// Type of the secret where certificate information will be written
    #[arg(long, default_value = "Opaque")]
    secret_type: String,
    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
#[command(author, version, about, long_about = None)]
pub struct PatchArgs {
    /// Name of the secret where certificate information will be read from
    #[arg(long)]
    secret_name: String,
    /// Namespace of the secret where certificate information will be read from
    #[arg(long)]
    namespace: String,
    /// Name of the ca field in the secret
    #[arg(long, default_value = CA_FIELD)]
    ca_name: String,
    /// Name of ValidatingWebhookConfiguration and MutatingWebhookConfiguration that will be updated
    #[arg(long, default_value = "")]
    webhook_name: String,
    /// Name of APIService that will be patched
    #[arg(long = "apiservice-name", default_value = "")]
    api_service_name: String,
    /// If true, patch ValidatingWebhookConfiguration
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    patch_validating: bool,
    /// If true, patch MutatingWebhookConfiguration
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    patch_mutating: bool,
    /// If set, patch the webhooks with this failure policy. Valid options are Ignore or Fail
    #[arg(long, default_value = "")]
    patch_failure_policy: String,
    /// Patch method to use: patch|update. patch uses server side apply, update uses a full object update
    #[arg(long, default_value = "update")]
    patch_mode: String,
    #[command(flatten)]
    global: GlobalArgs,
}

impl From<&CreateArgs> for CreateConfig {
    fn from(args: &CreateArgs) -> CreateConfig {
        CreateConfig {
            host: args.host.clone(),
            secret_name: args.secret_name.clone(),
            secret_type: args.secret_type.clone(),
            namespace: args.namespace.clone(),
            cert_name: args.cert_name.clone(),
            key_name: args.key_name.clone(),
        }
    }
}

impl From<&PatchArgs> for PatchConfig {
    fn from(args: &PatchArgs) -> PatchConfig {
        PatchConfig {
            secret_name: args.secret_name.clone(),
            namespace: args.namespace.clone(),
            ca_name: args.ca_name.clone(),
            webhook_name: args.webhook_name.clone(),
            api_service_name: args.api_service_name.clone(),
            patch_validating: args.patch_validating,
            patch_mutating: args.patch_mutating,
            patch_failure_policy: args.patch_failure_policy.clone(),
            patch_mode: args.patch_mode.clone(),
        }
    }
}

async fn run(cli: WebhookCertgenCli) -> Result<(), Error> {
    match cli {
        WebhookCertgenCli::Create(args) => {
            logging::init(args.global.log_format, args.global.log_level);
            let k8s = K8s::connect(args.global.kubeconfig.as_deref()).await?;
            command::create(&k8s, &CreateConfig::from(&args)).await?;
        }
        WebhookCertgenCli::Patch(args) => {
            logging::init(args.global.log_format, args.global.log_level);
            let k8s = K8s::connect(args.global.kubeconfig.as_deref()).await?;
            command::patch(&k8s, &PatchConfig::from(&args)).await?;
        }
        WebhookCertgenCli::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            println!(
                "build {}-{} ({})",
                std::env::consts::ARCH,
                std::env::consts::OS,
                if cfg!(debug_assertions) { "debug" } else { "release" }
            );
        }
    };

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match WebhookCertgenCli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            // bare invocation prints usage and succeeds
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => e.exit(),
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<WebhookCertgenCli, clap::Error> {
        WebhookCertgenCli::try_parse_from(std::iter::once("kube-webhook-certgen").chain(args.iter().copied()))
    }

    #[test]
    fn create_requires_host_secret_and_namespace() {
        assert!(parse(&["create", "--secret-name", "s", "--namespace", "n"]).is_err());
        assert!(parse(&["create", "--host", "h", "--namespace", "n"]).is_err());
        assert!(parse(&["create", "--host", "h", "--secret-name", "s"]).is_err());
    }

    #[test]
    fn create_defaults() {
        let cli = parse(&["create", "--host=localhost", "--secret-name=s", "--namespace=n"]).unwrap();
        let WebhookCertgenCli::Create(args) = cli else {
            panic!("expected create");
        };
        let config = CreateConfig::from(&args);

        assert_eq!(config.host, "localhost");
        assert_eq!(config.cert_name, "cert");
        assert_eq!(config.key_name, "key");
        assert_eq!(config.secret_type, "Opaque");
        assert_eq!(args.global.log_format, LogFormat::Json);
        assert_eq!(args.global.log_level, LogLevel::Info);
        assert!(args.global.kubeconfig.is_none());
    }

    #[test]
    fn patch_defaults() {
        let cli = parse(&["patch", "--secret-name=s", "--namespace=n"]).unwrap();
        let WebhookCertgenCli::Patch(args) = cli else {
            panic!("expected patch");
        };
        let config = PatchConfig::from(&args);

        assert_eq!(config.ca_name, "ca.crt");
        assert_eq!(config.webhook_name, "");
        assert_eq!(config.api_service_name, "");
        assert!(config.patch_validating);
        assert!(config.patch_mutating);
        assert_eq!(config.patch_failure_policy, "");
        assert_eq!(config.patch_mode, "update");
    }

    #[test]
    fn patch_flags_accept_explicit_booleans() {
        let cli = parse(&[
            "patch",
            "--secret-name=s",
            "--namespace=n",
            "--webhook-name=w",
            "--patch-validating=true",
            "--patch-mutating=false",
            "--patch-failure-policy=Fail",
            "--patch-mode=patch",
            "--apiservice-name=v1beta1.metrics.k8s.io",
            "--kubeconfig=/tmp/kubeconfig",
            "--log-format=text",
            "--log-level=debug",
        ])
        .unwrap();
        let WebhookCertgenCli::Patch(args) = cli else {
            panic!("expected patch");
        };
        let config = PatchConfig::from(&args);

        assert!(config.patch_validating);
        assert!(!config.patch_mutating);
        assert_eq!(config.webhook_name, "w");
        assert_eq!(config.api_service_name, "v1beta1.metrics.k8s.io");
        assert_eq!(config.patch_failure_policy, "Fail");
        assert_eq!(config.patch_mode, "patch");
        assert_eq!(args.global.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(args.global.log_format, LogFormat::Text);
        assert_eq!(args.global.log_level, LogLevel::Debug);
    }

    #[test]
    fn invalid_log_settings_are_rejected() {
        assert!(parse(&["patch", "--secret-name=s", "--namespace=n", "--log-format=xml"]).is_err());
        assert!(parse(&["patch", "--secret-name=s", "--namespace=n", "--log-level=trace"]).is_err());
    }

    #[test]
    fn version_takes_no_arguments() {
        assert!(matches!(parse(&["version"]), Ok(WebhookCertgenCli::Version)));
    }

    #[test]
    fn bare_invocation_asks_for_help() {
        let err = parse(&[]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand);
        assert!(err.to_string().contains("Usage: kube-webhook-certgen"));

        let err = parse(&["frobnicate"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }
}
