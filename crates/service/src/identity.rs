//! Accounts, sessions and admin moderation.
//!
//! Customers, sellers and admins share one [`Principal`] record; the role
//! decides which routes a session may reach and which extra fields apply.

use std::sync::Arc;
use std::time::Duration;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use model::{Actor, Address, Principal, Role};
use repository::Repositories;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::ports::{MailMessage, Mailer};
use crate::{ServiceError, ServiceSettings, not_found};

/// What a signed token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Session,
    Reset,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    purpose: TokenPurpose,
    /// Password fingerprint; reset tokens die once the password changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fp: Option<String>,
    iat: i64,
    exp: i64,
}

/// Issues and verifies HS256 tokens.
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    reset_ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: &str, session_ttl: Duration, reset_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl,
            reset_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn issue(&self, actor: Actor) -> Result<String, ServiceError> {
        self.sign(actor, TokenPurpose::Session, None, self.session_ttl)
    }

    pub fn verify(&self, token: &str) -> Result<Actor, ServiceError> {
        self.open(token, TokenPurpose::Session).map(|(actor, _)| actor)
    }

    fn issue_reset(&self, principal: &Principal) -> Result<String, ServiceError> {
        self.sign(
            principal.actor(),
            TokenPurpose::Reset,
            Some(fingerprint(&principal.password_hash)),
            self.reset_ttl,
        )
    }

    fn verify_reset(&self, token: &str) -> Result<(Actor, Option<String>), ServiceError> {
        self.open(token, TokenPurpose::Reset)
    }

    fn sign(
        &self,
        actor: Actor,
        purpose: TokenPurpose,
        fp: Option<String>,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let claims = Claims {
            sub: actor.id,
            role: actor.role,
            purpose,
            fp,
            iat: now,
            exp: now.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Unexpected(format!("Failed to sign token: {e}")))
    }

    fn open(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<(Actor, Option<String>), ServiceError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|_| ServiceError::Unauthorized("Invalid or expired token".into()))?;
        if data.claims.purpose != purpose {
            return Err(ServiceError::Unauthorized("Invalid or expired token".into()));
        }
        Ok((
            Actor {
                id: data.claims.sub,
                role: data.claims.role,
            },
            data.claims.fp,
        ))
    }
}

fn fingerprint(password_hash: &str) -> String {
    let tail = password_hash.len().saturating_sub(16);
    password_hash.get(tail..).unwrap_or_default().to_string()
}

pub(crate) fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::Unexpected(format!("Failed to hash password: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    #[validate(length(min = 2, max = 80))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[serde(default)]
    #[validate(length(min = 5, max = 20))]
    pub phone: Option<String>,
    /// Required for sellers.
    #[serde(default)]
    #[validate(length(min = 2, max = 80))]
    pub shop_name: Option<String>,
    /// Required for admins.
    #[serde(default)]
    pub admin_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 2, max = 80))]
    pub name: Option<String>,
    #[validate(length(min = 5, max = 20))]
    pub phone: Option<String>,
    pub address: Option<Address>,
    #[validate(length(min = 2, max = 80))]
    pub shop_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    pub current_password: String,
    #[validate(length(min = 6, max = 128))]
    pub new_password: String,
}

/// A freshly authenticated principal and its session token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub principal: Principal,
    pub token: String,
}

/// Admin actions on a seller account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellerModeration {
    Verify,
    Block,
    Unblock,
}

/// # IdentityService
///
/// Sign-up, sign-in, profiles, password recovery and account moderation.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn register(&self, role: Role, input: RegisterInput)
    -> Result<AuthSession, ServiceError>;
    async fn login(&self, role: Role, input: LoginInput) -> Result<AuthSession, ServiceError>;
    /// Resolves a session token to a principal that may still sign in.
    async fn authenticate(&self, token: &str) -> Result<Actor, ServiceError>;
    async fn profile(&self, actor: Actor) -> Result<Principal, ServiceError>;
    async fn update_profile(
        &self,
        actor: Actor,
        update: ProfileUpdate,
    ) -> Result<Principal, ServiceError>;
    async fn change_password(
        &self,
        actor: Actor,
        input: ChangePasswordInput,
    ) -> Result<(), ServiceError>;
    /// Mails a reset link to a customer. Unknown addresses succeed silently.
    async fn forgot_password(&self, email: &str) -> Result<(), ServiceError>;
    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError>;
    async fn list_principals(&self, role: Role) -> Result<Vec<Principal>, ServiceError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Principal, ServiceError>;
    /// Deletes a customer together with their cart and wishlist.
    async fn delete_user(&self, id: Uuid) -> Result<(), ServiceError>;
    async fn moderate_seller(
        &self,
        id: Uuid,
        action: SellerModeration,
    ) -> Result<Principal, ServiceError>;
}

pub struct IdentityServiceImpl {
    repos: Repositories,
    tokens: Arc<SessionTokens>,
    mailer: Arc<dyn Mailer>,
    settings: ServiceSettings,
}

impl IdentityServiceImpl {
    pub fn new(
        repos: Repositories,
        tokens: Arc<SessionTokens>,
        mailer: Arc<dyn Mailer>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            repos,
            tokens,
            mailer,
            settings,
        }
    }

    fn session_for(&self, principal: Principal) -> Result<AuthSession, ServiceError> {
        let token = self.tokens.issue(principal.actor())?;
        Ok(AuthSession { principal, token })
    }

    async fn load(&self, id: Uuid) -> Result<Principal, ServiceError> {
        self.repos
            .principals
            .get_by_id(id)
            .await
            .map_err(not_found("Account"))
    }
}

#[async_trait]
impl IdentityService for IdentityServiceImpl {
    #[instrument(skip(self, input), fields(email = %input.email))]
    async fn register(
        &self,
        role: Role,
        input: RegisterInput,
    ) -> Result<AuthSession, ServiceError> {
        input.validate()?;
        match role {
            Role::Seller if input.shop_name.is_none() => {
                return Err(ServiceError::Validation("Shop name is required".into()));
            }
            Role::Admin
                if input.admin_key.as_deref()
                    != Some(self.settings.admin_registration_key.as_str()) =>
            {
                return Err(ServiceError::Forbidden("Invalid admin registration key".into()));
            }
            _ => {}
        }

        let email = normalize_email(&input.email);
        if self
            .repos
            .principals
            .find_by_email(role, &email)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email is already registered".into()));
        }

        let mut principal = Principal::new(
            role,
            input.name.trim().to_string(),
            email,
            hash_password(&input.password)?,
        );
        principal.phone = input.phone;
        if let (Some(profile), Some(shop_name)) = (principal.seller.as_mut(), input.shop_name) {
            profile.shop_name = shop_name;
        }
        self.repos.principals.insert(&principal).await?;
        info!(id = %principal.id, %role, "Registered account");
        self.session_for(principal)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    async fn login(&self, role: Role, input: LoginInput) -> Result<AuthSession, ServiceError> {
        input.validate()?;
        let principal = self
            .repos
            .principals
            .find_by_email(role, &normalize_email(&input.email))
            .await?
            .filter(|p| verify_password(&input.password, &p.password_hash))
            .ok_or_else(|| ServiceError::Unauthorized("Invalid email or password".into()))?;

        if !principal.is_active {
            return Err(ServiceError::Forbidden("Account is deactivated".into()));
        }
        if !principal.can_sign_in() {
            return Err(ServiceError::Forbidden("Seller account is blocked".into()));
        }
        self.session_for(principal)
    }

    async fn authenticate(&self, token: &str) -> Result<Actor, ServiceError> {
        let actor = self.tokens.verify(token)?;
        let principal = self
            .repos
            .principals
            .get_by_id(actor.id)
            .await
            .map_err(|e| match e {
                repository::RepositoryError::NotFound => {
                    ServiceError::Unauthorized("Account no longer exists".into())
                }
                other => other.into(),
            })?;
        if principal.role != actor.role || !principal.can_sign_in() {
            return Err(ServiceError::Unauthorized("Session is no longer valid".into()));
        }
        Ok(actor)
    }

    async fn profile(&self, actor: Actor) -> Result<Principal, ServiceError> {
        self.load(actor.id).await
    }

    #[instrument(skip(self, update), fields(id = %actor.id))]
    async fn update_profile(
        &self,
        actor: Actor,
        update: ProfileUpdate,
    ) -> Result<Principal, ServiceError> {
        update.validate()?;
        if let Some(address) = &update.address {
            address.validate()?;
        }
        let mut principal = self.load(actor.id).await?;
        if let Some(name) = update.name {
            principal.name = name.trim().to_string();
        }
        if let Some(phone) = update.phone {
            principal.phone = Some(phone);
        }
        if let Some(address) = update.address {
            principal.address = Some(address);
        }
        if let (Some(profile), Some(shop_name)) = (principal.seller.as_mut(), update.shop_name) {
            profile.shop_name = shop_name;
        }
        principal.updated_at = Utc::now();
        self.repos.principals.update(&principal).await?;
        Ok(principal)
    }

    #[instrument(skip(self, input), fields(id = %actor.id))]
    async fn change_password(
        &self,
        actor: Actor,
        input: ChangePasswordInput,
    ) -> Result<(), ServiceError> {
        input.validate()?;
        let mut principal = self.load(actor.id).await?;
        if !verify_password(&input.current_password, &principal.password_hash) {
            return Err(ServiceError::Unauthorized("Current password is incorrect".into()));
        }
        principal.password_hash = hash_password(&input.new_password)?;
        principal.updated_at = Utc::now();
        self.repos.principals.update(&principal).await?;
        Ok(())
    }

    #[instrument(skip(self, email))]
    async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let Some(principal) = self
            .repos
            .principals
            .find_by_email(Role::User, &normalize_email(email))
            .await?
            .filter(Principal::can_sign_in)
        else {
            info!("Password reset requested for unknown address");
            return Ok(());
        };

        let token = self.tokens.issue_reset(&principal)?;
        let link = format!(
            "{}/reset-password?token={}",
            self.settings.client_url.trim_end_matches('/'),
            token
        );
        let message = MailMessage {
            to: principal.email.clone(),
            subject: "Reset your password".into(),
            text: format!(
                "Hi {},\n\nUse the link below to choose a new password. It expires in {} minutes.\n\n{}\n",
                principal.name,
                self.tokens.reset_ttl.as_secs() / 60,
                link
            ),
        };
        if let Err(e) = self.mailer.send(message).await {
            warn!(id = %principal.id, error = %e, "Failed to send password reset mail");
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        let invalid = || ServiceError::Unauthorized("Reset link is invalid or has expired".into());
        let (actor, fp) = self.tokens.verify_reset(token).map_err(|_| invalid())?;
        if !(6..=128).contains(&new_password.chars().count()) {
            return Err(ServiceError::Validation(
                "Password must be between 6 and 128 characters".into(),
            ));
        }
        let mut principal = self.load(actor.id).await.map_err(|_| invalid())?;
        if fp.as_deref() != Some(fingerprint(&principal.password_hash).as_str()) {
            return Err(invalid());
        }
        principal.password_hash = hash_password(new_password)?;
        principal.updated_at = Utc::now();
        self.repos.principals.update(&principal).await?;
        info!(id = %principal.id, "Password reset");
        Ok(())
    }

    async fn list_principals(&self, role: Role) -> Result<Vec<Principal>, ServiceError> {
        Ok(self.repos.principals.list_by_role(role).await?)
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Principal, ServiceError> {
        let mut principal = self.load(id).await?;
        if principal.role == Role::Admin {
            return Err(ServiceError::Forbidden("Admin accounts cannot be deactivated".into()));
        }
        principal.is_active = active;
        principal.updated_at = Utc::now();
        self.repos.principals.update(&principal).await?;
        Ok(principal)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: Uuid) -> Result<(), ServiceError> {
        let principal = self.load(id).await?;
        if principal.role != Role::User {
            return Err(ServiceError::Forbidden(
                "Only customer accounts can be deleted".into(),
            ));
        }
        self.repos.carts.delete(id).await?;
        self.repos.wishlists.delete(id).await?;
        self.repos.principals.delete(id).await?;
        info!(%id, "Deleted customer account");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn moderate_seller(
        &self,
        id: Uuid,
        action: SellerModeration,
    ) -> Result<Principal, ServiceError> {
        let mut principal = self.load(id).await?;
        if principal.role != Role::Seller {
            return Err(ServiceError::NotFound("Seller not found".into()));
        }
        match action {
            SellerModeration::Verify => principal.verify_seller()?,
            SellerModeration::Block => principal.block_seller()?,
            SellerModeration::Unblock => principal.unblock_seller()?,
        }
        self.repos.principals.update(&principal).await?;
        info!(%id, ?action, "Seller moderated");
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingMailer, settings};

    fn service() -> (IdentityServiceImpl, Arc<RecordingMailer>) {
        let settings = settings();
        let mailer = Arc::new(RecordingMailer::default());
        let tokens = Arc::new(SessionTokens::new(
            &settings.jwt_secret,
            settings.session_ttl,
            settings.reset_token_ttl,
        ));
        let svc = IdentityServiceImpl::new(
            Repositories::in_memory(),
            tokens,
            mailer.clone(),
            settings,
        );
        (svc, mailer)
    }

    fn register_input(email: &str) -> RegisterInput {
        RegisterInput {
            name: "Meera".into(),
            email: email.into(),
            password: "s3cret-pass".into(),
            phone: None,
            shop_name: Some("Meera Threads".into()),
            admin_key: None,
        }
    }

    #[test]
    fn session_tokens_round_trip_and_reject_reset_tokens() {
        let tokens = SessionTokens::new("k", Duration::from_secs(60), Duration::from_secs(60));
        let actor = Actor {
            id: Uuid::new_v4(),
            role: Role::Seller,
        };
        let token = tokens.issue(actor).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), actor);
        assert!(tokens.verify_reset(&token).is_err());

        let other = SessionTokens::new("other", Duration::from_secs(60), Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn passwords_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[tokio::test]
    async fn same_email_can_exist_once_per_role() {
        let (svc, _) = service();
        svc.register(Role::User, register_input("a@shop.test"))
            .await
            .unwrap();
        let dup = svc
            .register(Role::User, register_input("A@Shop.test"))
            .await;
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));
        svc.register(Role::Seller, register_input("a@shop.test"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admin_registration_needs_the_key() {
        let (svc, _) = service();
        let denied = svc.register(Role::Admin, register_input("root@shop.test")).await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let mut input = register_input("root@shop.test");
        input.admin_key = Some(settings().admin_registration_key);
        let session = svc.register(Role::Admin, input).await.unwrap();
        assert_eq!(session.principal.role, Role::Admin);
    }

    #[tokio::test]
    async fn blocked_seller_cannot_log_in_and_stays_unverified_after_unblock() {
        let (svc, _) = service();
        let seller = svc
            .register(Role::Seller, register_input("s@shop.test"))
            .await
            .unwrap()
            .principal;

        svc.moderate_seller(seller.id, SellerModeration::Verify)
            .await
            .unwrap();
        let blocked = svc
            .moderate_seller(seller.id, SellerModeration::Block)
            .await
            .unwrap();
        let profile = blocked.seller.clone().unwrap();
        assert!(profile.is_blocked && !profile.is_verified);

        let login = svc
            .login(
                Role::Seller,
                LoginInput {
                    email: "s@shop.test".into(),
                    password: "s3cret-pass".into(),
                },
            )
            .await;
        assert!(matches!(login, Err(ServiceError::Forbidden(_))));
        assert!(matches!(
            svc.moderate_seller(seller.id, SellerModeration::Verify).await,
            Err(ServiceError::Conflict(_))
        ));

        let unblocked = svc
            .moderate_seller(seller.id, SellerModeration::Unblock)
            .await
            .unwrap();
        assert!(!unblocked.seller.unwrap().is_verified);
    }

    #[tokio::test]
    async fn reset_token_works_once() {
        let (svc, mailer) = service();
        svc.register(Role::User, register_input("u@shop.test"))
            .await
            .unwrap();

        svc.forgot_password("u@shop.test").await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        let token = sent[0]
            .text
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string();

        svc.reset_password(&token, "brand-new-pass").await.unwrap();
        assert!(matches!(
            svc.reset_password(&token, "another-pass").await,
            Err(ServiceError::Unauthorized(_))
        ));

        let session = svc
            .login(
                Role::User,
                LoginInput {
                    email: "u@shop.test".into(),
                    password: "brand-new-pass".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(session.principal.email, "u@shop.test");
    }

    #[tokio::test]
    async fn unknown_email_reset_sends_nothing() {
        let (svc, mailer) = service();
        svc.forgot_password("ghost@shop.test").await.unwrap();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn deactivated_user_session_stops_working() {
        let (svc, _) = service();
        let session = svc
            .register(Role::User, register_input("d@shop.test"))
            .await
            .unwrap();
        assert!(svc.authenticate(&session.token).await.is_ok());

        svc.set_active(session.principal.id, false).await.unwrap();
        assert!(matches!(
            svc.authenticate(&session.token).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
