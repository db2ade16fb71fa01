//! Login and two-factor scripts.

use std::time::Duration;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

use super::{FidelitySession, LOGIN_URL, SUMMARY_URL};
use crate::browser::{self, Locator, WaitState};
use crate::config::Credentials;
use crate::login::{classify_page, transition, LoginError, LoginPage, LoginProbes, LoginState, LoginStatus};
use crate::totp;

/// The spinner disappears, then a second one shows up shortly after.
const SECOND_SPINNER_DELAY_MS: u64 = 1_000;
const SMS_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

const SAVE_DEVICE_LABEL: &str = "Don't ask me again on this";

fn code_input() -> Locator {
    Locator::placeholder("XXXXXX")
}

impl FidelitySession {
    /// Log in with `creds`.
    ///
    /// Returns `AUTHENTICATED` when the summary page was reached (directly or
    /// after the TOTP step), `NEEDS_CODE` when an SMS code was requested
    /// (finish with [`login_2fa`](Self::login_2fa)), and `FAILED` otherwise.
    pub async fn login(&mut self, creds: &Credentials) -> LoginStatus {
        match self.try_login(creds).await {
            Ok(state) => {
                let status = LoginStatus::from_state(Ok(state));
                info!(user = %creds.masked_username(), %status, "Login finished");
                status
            }
            Err(e) => {
                if browser::is_timeout(&e) {
                    warn!(error = %e, "Timeout waiting for login page to load or navigate");
                } else {
                    error!(error = %e, "Login failed");
                }
                self.capture_failure("login").await;
                LoginStatus::FAILED
            }
        }
    }

    async fn try_login(&mut self, creds: &Credentials) -> Result<LoginState> {
        self.page.goto(LOGIN_URL).await?;

        let username = Locator::label_exact("Username");
        self.page.click(&username).await?;
        self.page.fill(&username, &creds.username).await?;
        let password = Locator::label_exact("Password");
        self.page.click(&password).await?;
        self.page.fill(&password, creds.password.expose_secret()).await?;
        self.page.click(&Locator::role_named("button", "Log in")).await?;

        self.wait_for_loading().await?;
        self.page.wait_for_timeout(SECOND_SPINNER_DELAY_MS).await;
        self.wait_for_loading().await?;

        let url = self.page.url().await?;
        let probes = if url.contains("login") && !url.contains("summary") {
            self.wait_for_loading().await?;
            self.page
                .wait_for(
                    &Locator::css("#dom-widget div").first(),
                    WaitState::Visible,
                    self.cfg.timeouts.element(),
                )
                .await?;
            self.probe_login_page().await?
        } else {
            LoginProbes::default()
        };

        let page = classify_page(&url, &probes, creds.has_totp());
        let state = transition(page, &url)?;
        match state {
            LoginState::NeedTotp => {
                let secret = creds
                    .totp_secret
                    .as_ref()
                    .ok_or(LoginError::MissingTotpSecret)?;
                self.complete_totp(secret).await?;
                Ok(LoginState::Authenticated)
            }
            LoginState::NeedSmsCode => {
                self.request_sms_code(page).await?;
                Ok(LoginState::NeedSmsCode)
            }
            other => Ok(other),
        }
    }

    async fn probe_login_page(&self) -> Result<LoginProbes> {
        Ok(LoginProbes {
            totp_heading: self
                .page
                .is_visible(&Locator::role_named("heading", "Enter the code from your"))
                .await?,
            authenticator_text: self
                .page
                .is_visible(&Locator::text(
                    "Enter the code from your authenticator app This security code will confirm the",
                ))
                .await?,
            try_another_way: self
                .page
                .is_visible(&Locator::role_named("link", "Try another way"))
                .await?,
            text_me_button: self
                .page
                .is_visible(&Locator::role_named("button", "Text me the code"))
                .await?,
        })
    }

    async fn complete_totp(&mut self, secret: &SecretString) -> Result<()> {
        let code = totp::current_code(secret)?;
        self.page.click(&code_input()).await?;
        self.page.fill(&code_input(), &code).await?;

        if self.cfg.session.save_device {
            self.check_save_device().await?;
        }
        self.page.click(&Locator::role_named("button", "Continue")).await?;
        self.wait_for_loading().await?;
        self.page
            .wait_for_url(SUMMARY_URL, self.cfg.timeouts.navigation())
            .await?;
        Ok(())
    }

    async fn request_sms_code(&mut self, page: LoginPage) -> Result<()> {
        if page == LoginPage::PushPrompt {
            if self.cfg.session.save_device {
                self.check_save_device().await?;
            }
            self.page
                .click(&Locator::role_named("link", "Try another way"))
                .await?;
        }
        self.page
            .click(&Locator::role_named("button", "Text me the code"))
            .await?;
        self.page.click(&code_input()).await?;
        info!("SMS code requested");
        Ok(())
    }

    async fn check_save_device(&self) -> Result<()> {
        let checkbox = Locator::css("label").has_text(SAVE_DEVICE_LABEL);
        self.page.check(&checkbox).await?;
        if !self.page.is_checked(&checkbox).await? {
            return Err(LoginError::SaveDeviceUnchecked.into());
        }
        Ok(())
    }

    /// Finish an SMS login with the code the operator received.
    pub async fn login_2fa(&mut self, code: &str) -> bool {
        match self.try_login_2fa(code).await {
            Ok(()) => {
                info!("Two-factor login complete");
                true
            }
            Err(e) => {
                if browser::is_timeout(&e) {
                    warn!(error = %e, "Timeout waiting for the summary page after 2FA");
                } else {
                    error!(error = %e, "Two-factor login failed");
                }
                self.capture_failure("login_2fa").await;
                false
            }
        }
    }

    async fn try_login_2fa(&mut self, code: &str) -> Result<()> {
        self.page.fill(&code_input(), code.trim()).await?;
        if self.cfg.session.save_device {
            self.check_save_device().await?;
        }
        self.page.click(&Locator::role_named("button", "Submit")).await?;
        self.page.wait_for_url(SUMMARY_URL, SMS_SUBMIT_TIMEOUT).await?;
        Ok(())
    }
}
