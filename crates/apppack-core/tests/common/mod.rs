//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::OnceLock;

use apppack_core::{CertBundle, RecipientPrivateKey};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};

static RECIPIENT: OnceLock<RecipientPrivateKey> = OnceLock::new();

/// RSA-2048 recipient key, generated once per test binary.
pub fn recipient() -> &'static RecipientPrivateKey {
    RECIPIENT.get_or_init(|| RecipientPrivateKey::generate(2048).expect("keygen"))
}

/// A throwaway CA plus the server and client certificates it issued.
pub struct TestPki {
    pub ca: Certificate,
    pub ca_key: KeyPair,
    pub server: Certificate,
    pub server_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().expect("ca key");
        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "apppack test root");
        let ca = ca_params.self_signed(&ca_key).expect("ca cert");

        let server_key = KeyPair::generate().expect("server key");
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string()]).expect("server params");
        server_params
            .distinguished_name
            .push(DnType::CommonName, "agent");
        let server = server_params
            .signed_by(&server_key, &ca, &ca_key)
            .expect("server cert");

        Self {
            ca,
            ca_key,
            server,
            server_key,
        }
    }

    /// Client bundle whose user certificate expires on the given date.
    pub fn client_bundle(&self, not_after: (i32, u8, u8)) -> CertBundle {
        let user_key = KeyPair::generate().expect("user key");
        let mut params = CertificateParams::new(vec!["installer".to_string()]).expect("user params");
        params.distinguished_name.push(DnType::CommonName, "installer");
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
        let user = params
            .signed_by(&user_key, &self.ca, &self.ca_key)
            .expect("user cert");
        CertBundle::new(user.pem(), user_key.serialize_pem(), self.ca.pem())
    }

    pub fn valid_client(&self) -> CertBundle {
        self.client_bundle((2999, 1, 1))
    }

    pub fn expired_client(&self) -> CertBundle {
        self.client_bundle((2001, 1, 1))
    }
}
