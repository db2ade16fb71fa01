//! Login state progression.
//!
//! After the credentials are submitted the site lands on one of a few
//! pages. The browser script probes the page, `classify_page` turns the
//! probes into a [`LoginPage`], and `transition` decides which state the
//! login is in. Both are pure so every combination can be tested without a
//! browser.

use thiserror::Error;

/// Where a login attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    NeedCredentials,
    Authenticated,
    /// An SMS code was requested; finish with `login_2fa`.
    NeedSmsCode,
    /// An authenticator code is expected and a secret is available.
    NeedTotp,
}

/// What the site showed after the credentials were submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPage {
    /// Portfolio summary reached.
    Summary,
    /// "Enter the code from your authenticator app" heading.
    TotpPrompt,
    /// The authenticator app is the only offered method.
    AuthenticatorOnly,
    /// Push notification page with a "Try another way" link.
    PushPrompt,
    /// "Text me the code" button.
    SmsPrompt,
    Unrecognized,
}

/// Visibility probes taken on the 2FA page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginProbes {
    pub totp_heading: bool,
    pub authenticator_text: bool,
    pub try_another_way: bool,
    pub text_me_button: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum LoginError {
    #[error("the site needs an authenticator code but no TOTP secret is configured")]
    MissingTotpSecret,
    #[error("cannot reach the login page; another 2FA method may be active (url: {url})")]
    UnrecognizedPage { url: String },
    #[error("cannot check 'Don't ask me again on this device'")]
    SaveDeviceUnchecked,
    #[error("timed out waiting for the login page")]
    Timeout,
}

/// Classify the page reached after submitting credentials.
///
/// `has_totp` matters because the authenticator heading is only acted on
/// when a secret is available; otherwise the page falls through to the
/// remaining probes like the site's own flow does.
pub fn classify_page(url: &str, probes: &LoginProbes, has_totp: bool) -> LoginPage {
    if url.contains("summary") {
        return LoginPage::Summary;
    }
    if !url.contains("login") {
        return LoginPage::Unrecognized;
    }
    if has_totp && probes.totp_heading {
        return LoginPage::TotpPrompt;
    }
    if probes.authenticator_text {
        return LoginPage::AuthenticatorOnly;
    }
    if probes.try_another_way {
        return LoginPage::PushPrompt;
    }
    if probes.text_me_button {
        return LoginPage::SmsPrompt;
    }
    LoginPage::Unrecognized
}

/// The state a freshly classified page puts the login in.
pub fn transition(page: LoginPage, url: &str) -> Result<LoginState, LoginError> {
    match page {
        LoginPage::Summary => Ok(LoginState::Authenticated),
        LoginPage::TotpPrompt => Ok(LoginState::NeedTotp),
        LoginPage::PushPrompt | LoginPage::SmsPrompt => Ok(LoginState::NeedSmsCode),
        LoginPage::AuthenticatorOnly => Err(LoginError::MissingTotpSecret),
        LoginPage::Unrecognized => Err(LoginError::UnrecognizedPage {
            url: url.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of `login`: whether the credentials were accepted and whether
/// the session is fully authenticated. Only three combinations exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginStatus {
    pub credentials_accepted: bool,
    pub authenticated: bool,
}

impl LoginStatus {
    pub const AUTHENTICATED: LoginStatus = LoginStatus {
        credentials_accepted: true,
        authenticated: true,
    };
    /// More input (an SMS code) is needed.
    pub const NEEDS_CODE: LoginStatus = LoginStatus {
        credentials_accepted: true,
        authenticated: false,
    };
    pub const FAILED: LoginStatus = LoginStatus {
        credentials_accepted: false,
        authenticated: false,
    };

    /// Collapse a state (or a fatal error) into the reported pair.
    /// `NeedTotp` is never reported: the script resolves it itself.
    pub fn from_state(state: Result<LoginState, LoginError>) -> Self {
        match state {
            Ok(LoginState::Authenticated) => Self::AUTHENTICATED,
            Ok(LoginState::NeedSmsCode) => Self::NEEDS_CODE,
            Ok(LoginState::NeedTotp) | Ok(LoginState::NeedCredentials) | Err(_) => Self::FAILED,
        }
    }

    pub fn as_pair(&self) -> (bool, bool) {
        (self.credentials_accepted, self.authenticated)
    }
}

impl std::fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_pair() {
            (true, true) => write!(f, "authenticated"),
            (true, false) => write!(f, "awaiting 2FA code"),
            _ => write!(f, "failed"),
        }
    }
}
