//! Credential parsing through to the login outcome.

use fidelity_automation::config::Credentials;
use fidelity_automation::login::{
    classify_page, transition, LoginError, LoginPage, LoginProbes, LoginState, LoginStatus,
};
use fidelity_automation::session::{LOGIN_URL, SUMMARY_URL};
use fidelity_automation::totp;

/// RFC 6238 test key "12345678901234567890" in base32.
const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

fn outcome(creds: &Credentials, url: &str, probes: LoginProbes) -> LoginStatus {
    let page = classify_page(url, &probes, creds.has_totp());
    let state = match transition(page, url) {
        // With a secret the script types the code itself and lands on the summary.
        Ok(LoginState::NeedTotp) => {
            assert!(creds.has_totp());
            Ok(LoginState::Authenticated)
        }
        other => other,
    };
    LoginStatus::from_state(state)
}

#[test]
fn test_credential_sets_drive_login_paths() {
    let creds = Credentials::parse_list(&format!(
        "alice:pw1:{RFC_SECRET}:Z12345678,bob:pw2:NA"
    ))
    .unwrap();
    let (alice, bob) = (&creds[0], &creds[1]);

    let totp_page = LoginProbes {
        totp_heading: true,
        authenticator_text: true,
        ..LoginProbes::default()
    };
    assert_eq!(outcome(alice, LOGIN_URL, totp_page), LoginStatus::AUTHENTICATED);
    assert_eq!(outcome(bob, LOGIN_URL, totp_page), LoginStatus::FAILED);

    let push_page = LoginProbes {
        try_another_way: true,
        ..LoginProbes::default()
    };
    assert_eq!(outcome(bob, LOGIN_URL, push_page), LoginStatus::NEEDS_CODE);
    assert_eq!(outcome(alice, SUMMARY_URL, push_page), LoginStatus::AUTHENTICATED);
}

#[test]
fn test_missing_secret_is_reported() {
    let bob = Credentials::parse("bob:pw:NA", 0).unwrap();
    let probes = LoginProbes {
        totp_heading: true,
        authenticator_text: true,
        ..LoginProbes::default()
    };
    let page = classify_page(LOGIN_URL, &probes, bob.has_totp());
    assert_eq!(page, LoginPage::AuthenticatorOnly);
    let err = transition(page, LOGIN_URL).unwrap_err();
    assert_eq!(err, LoginError::MissingTotpSecret);
    assert!(err.to_string().contains("no TOTP secret"));
}

#[test]
fn test_totp_code_for_configured_secret() {
    let alice = Credentials::parse(&format!("alice:pw:{RFC_SECRET}"), 0).unwrap();
    let secret = alice.totp_secret.as_ref().unwrap();
    assert_eq!(totp::code_at(secret, 59).unwrap(), "287082");
    assert_eq!(totp::code_at(secret, 1_111_111_109).unwrap(), "081804");

    let code = totp::current_code(secret).unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}
