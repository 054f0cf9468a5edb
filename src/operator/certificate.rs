use std::net::IpAddr;

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::command::Error;

/// Backdating applied to `notBefore` to tolerate clock skew between nodes.
const CLOCK_SKEW: Duration = Duration::minutes(5);

/// 100 years of 365 days.
const VALIDITY: Duration = Duration::days(100 * 365);

/// Serial numbers are drawn uniformly from [0, 2^128).
const SERIAL_BYTES: usize = 16;

/// PEM encoded output of a single `generate_certs` run.
pub struct CertificateBundle {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Generates a self-signed CA and a leaf serving certificate for the
/// comma separated `hosts`, signed by that CA.
///
/// Every token that parses as an IP address lands in the IP SAN list, anything
/// else (including empty tokens) is taken verbatim as a DNS name.
pub fn generate_certs(hosts: &str) -> Result<CertificateBundle, Error> {
    let not_before = OffsetDateTime::now_utc() - CLOCK_SKEW;
    let not_after = not_before + VALIDITY;

    let mut ca_params = CertificateParams::default();
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;
    ca_params.serial_number = Some(random_serial()?);
    ca_params.distinguished_name = DistinguishedName::new();
    ca_params
        .distinguished_name
        .push(DnType::OrganizationName, "kube-webhook-certgen-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    ca_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let ca = Certificate::from_params(ca_params)?;

    let mut leaf_params = CertificateParams::default();
    leaf_params.not_before = not_before;
    leaf_params.not_after = not_after;
    leaf_params.serial_number = Some(random_serial()?);
    leaf_params.distinguished_name = DistinguishedName::new();
    leaf_params
        .distinguished_name
        .push(DnType::OrganizationName, "kube-webhook-certgen");
    leaf_params.is_ca = IsCa::ExplicitNoCa;
    leaf_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    leaf_params.subject_alt_names = subject_alt_names(hosts);

    let leaf = Certificate::from_params(leaf_params)?;

    let bundle = CertificateBundle {
        ca: ca.serialize_pem()?.into_bytes(),
        cert: leaf.serialize_pem_with_signer(&ca)?.into_bytes(),
        key: leaf.serialize_private_key_pem().into_bytes(),
    };

    debug!(hosts, "generated ca and leaf certificate");
    Ok(bundle)
}

fn subject_alt_names(hosts: &str) -> Vec<SanType> {
    hosts
        .split(',')
        .map(|host| match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(host.to_string()),
        })
        .collect()
}

fn random_serial() -> Result<SerialNumber, Error> {
    let mut serial = [0u8; SERIAL_BYTES];
    OsRng.try_fill_bytes(&mut serial)?;
    Ok(SerialNumber::from_slice(&serial))
}
