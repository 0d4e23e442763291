use crate::DirectorResult;
use crate::error::Error;

/// Trust settings for the Director endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM bundle with the Director CA. System roots are used when absent.
    pub ca_cert: Option<String>,
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    pub fn with_ca_cert(mut self, ca_cert: impl Into<String>) -> Self {
        self.ca_cert = Some(ca_cert.into());
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.insecure_skip_verify = insecure_skip_verify;
        self
    }
}

fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}

pub(crate) fn parse_pem_certificates(
    pem_bundle: &[u8],
    context: &str,
) -> DirectorResult<Vec<ureq::tls::Certificate<'static>>> {
    let mut certificates = Vec::new();
    for item in ureq::tls::parse_pem(pem_bundle) {
        let item = item.map_err(|source| {
            tls_config_error(format!("failed to parse PEM {context}: {source}"))
        })?;
        if let ureq::tls::PemItem::Certificate(certificate) = item {
            certificates.push(certificate);
        }
    }
    if certificates.is_empty() {
        return Err(tls_config_error(format!(
            "no certificate blocks found in PEM {context}"
        )));
    }
    Ok(certificates)
}

pub(crate) fn build_tls_config(settings: &TlsSettings) -> DirectorResult<ureq::tls::TlsConfig> {
    let mut builder = ureq::tls::TlsConfig::builder()
        .provider(ureq::tls::TlsProvider::Rustls)
        .disable_verification(settings.insecure_skip_verify);

    match settings.ca_cert.as_deref().map(str::trim) {
        Some(pem) if !pem.is_empty() => {
            let roots = parse_pem_certificates(pem.as_bytes(), "director CA certificate")?;
            builder = builder.root_certs(ureq::tls::RootCerts::new_with_certs(&roots));
        }
        _ => {
            builder = builder.root_certs(ureq::tls::RootCerts::WebPki);
        }
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::{TlsSettings, build_tls_config, parse_pem_certificates};
    use crate::error::ErrorCode;

    #[test]
    fn garbage_ca_bundle_is_rejected() {
        let settings = TlsSettings::default().with_ca_cert("not a certificate");
        let error = build_tls_config(&settings).expect_err("bundle without blocks");
        assert_eq!(error.code(), ErrorCode::TlsConfig);
        assert!(error.to_string().contains("director CA certificate"));
    }

    #[test]
    fn blank_ca_falls_back_to_default_roots() {
        let settings = TlsSettings::default().with_ca_cert("  \n");
        assert!(build_tls_config(&settings).is_ok());
    }

    #[test]
    fn empty_pem_input_has_no_certificates() {
        assert!(parse_pem_certificates(b"", "root").is_err());
    }
}
