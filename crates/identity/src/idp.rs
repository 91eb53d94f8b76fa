//! Identity provider templates.
//!
//! A provider is a base record (name, options, state) plus exactly one
//! protocol-specific configuration. Events travel on the instance or org
//! aggregate (`instance.idp.*` / `org.idp.*`) and decode into the same union.

use serde::{Deserialize, Serialize};

use warden_core::IdpId;
use warden_events::event_union;

use crate::secret::CryptoValue;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoLinkingField {
    #[default]
    Unspecified,
    UserName,
    Email,
}

impl AutoLinkingField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoLinkingField::Unspecified => "unspecified",
            AutoLinkingField::UserName => "user_name",
            AutoLinkingField::Email => "email",
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StylingType {
    #[default]
    Unspecified,
    Google,
}

impl StylingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StylingType::Unspecified => "unspecified",
            StylingType::Google => "google",
        }
    }
}

with_changes! {
    /// How users coming through a provider are linked and provisioned.
    pub struct IdpOptions / IdpOptionChanges {
        #[serde(default)]
        pub allow_creation: bool,
        #[serde(default)]
        pub allow_linking: bool,
        #[serde(default)]
        pub allow_auto_creation: bool,
        #[serde(default)]
        pub allow_auto_update: bool,
        #[serde(default)]
        pub auto_linking_field: AutoLinkingField,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzureTenant {
    #[default]
    Common,
    Organizations,
    Consumers,
    Custom(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamlNameIdFormat {
    Unspecified,
    EmailAddress,
    Persistent,
    Transient,
}

/// Attribute names an LDAP directory maps onto user fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LdapAttributes {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub phone_verified: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

with_changes! {
    /// Generic OpenID Connect.
    pub struct OidcConfig / OidcConfigChanges {
        pub issuer: String,
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
        #[serde(default)]
        pub is_id_token_mapping: bool,
        #[serde(default)]
        pub use_pkce: bool,
    }
}

with_changes! {
    /// Generic OAuth 2.0.
    pub struct OAuthConfig / OAuthConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        pub authorization_endpoint: String,
        pub token_endpoint: String,
        pub user_endpoint: String,
        #[serde(default)]
        pub scopes: Vec<String>,
        pub id_attribute: String,
        #[serde(default)]
        pub use_pkce: bool,
    }
}

with_changes! {
    pub struct JwtConfig / JwtConfigChanges {
        pub issuer: String,
        pub jwt_endpoint: String,
        pub keys_endpoint: String,
        pub header_name: String,
    }
}

with_changes! {
    pub struct AzureConfig / AzureConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub tenant: AzureTenant,
        #[serde(default)]
        pub is_email_verified: bool,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct GoogleConfig / GoogleConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct GitHubConfig / GitHubConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct GitHubEnterpriseConfig / GitHubEnterpriseConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        pub authorization_endpoint: String,
        pub token_endpoint: String,
        pub user_endpoint: String,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct GitLabConfig / GitLabConfigChanges {
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct GitLabSelfHostedConfig / GitLabSelfHostedConfigChanges {
        pub issuer: String,
        pub client_id: String,
        pub client_secret: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct LdapConfig / LdapConfigChanges {
        pub servers: Vec<String>,
        #[serde(default)]
        pub start_tls: bool,
        pub base_dn: String,
        pub bind_dn: String,
        pub bind_password: CryptoValue,
        pub user_base: String,
        #[serde(default)]
        pub user_object_classes: Vec<String>,
        #[serde(default)]
        pub user_filters: Vec<String>,
        #[serde(default)]
        pub timeout_secs: u64,
        #[serde(default)]
        pub attributes: LdapAttributes,
    }
}

with_changes! {
    pub struct AppleConfig / AppleConfigChanges {
        pub client_id: String,
        pub team_id: String,
        pub key_id: String,
        pub private_key: CryptoValue,
        #[serde(default)]
        pub scopes: Vec<String>,
    }
}

with_changes! {
    pub struct SamlConfig / SamlConfigChanges {
        pub metadata: Vec<u8>,
        pub key: CryptoValue,
        pub certificate: Vec<u8>,
        #[serde(default)]
        pub binding: Option<String>,
        #[serde(default)]
        pub with_signed_request: bool,
        #[serde(default)]
        pub name_id_format: Option<SamlNameIdFormat>,
        #[serde(default)]
        pub transient_mapping_attribute_name: Option<String>,
        #[serde(default)]
        pub federated_logout_enabled: bool,
    }
}

/// A configuration type that can be pulled out of an [`IdpConfig`].
pub trait IdpVariant: Sized {
    const TYPE: IdpType;

    fn from_config(config: IdpConfig) -> Option<Self>;

    fn into_config(self) -> IdpConfig;
}

macro_rules! idp_variants {
    ($( $variant:ident($config:ty) = $label:literal ),+ $(,)?) => {
        /// Discriminant of a provider's configuration.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum IdpType {
            $( $variant, )+
        }

        impl IdpType {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( IdpType::$variant => $label, )+
                }
            }
        }

        /// Protocol-specific payload of a provider.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type", content = "config", rename_all = "snake_case")]
        pub enum IdpConfig {
            $( $variant($config), )+
        }

        impl IdpConfig {
            pub fn idp_type(&self) -> IdpType {
                match self {
                    $( IdpConfig::$variant(_) => IdpType::$variant, )+
                }
            }
        }

        $(
            impl IdpVariant for $config {
                const TYPE: IdpType = IdpType::$variant;

                fn from_config(config: IdpConfig) -> Option<Self> {
                    match config {
                        IdpConfig::$variant(inner) => Some(inner),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn into_config(self) -> IdpConfig {
                    IdpConfig::$variant(self)
                }
            }
        )+
    };
}

idp_variants! {
    Oidc(OidcConfig) = "oidc",
    OAuth(OAuthConfig) = "oauth",
    Jwt(JwtConfig) = "jwt",
    Ldap(LdapConfig) = "ldap",
    Saml(SamlConfig) = "saml",
    Apple(AppleConfig) = "apple",
    Google(GoogleConfig) = "google",
    Azure(AzureConfig) = "azure",
    GitHub(GitHubConfig) = "github",
    GitHubEnterprise(GitHubEnterpriseConfig) = "github_enterprise",
    GitLab(GitLabConfig) = "gitlab",
    GitLabSelfHosted(GitLabSelfHostedConfig) = "gitlab_self_hosted",
}

impl core::fmt::Display for IdpType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider of type `C` was added, or migrated into type `C`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpAdded<C> {
    pub id: IdpId,
    pub name: String,
    #[serde(flatten)]
    pub options: IdpOptions,
    #[serde(flatten)]
    pub config: C,
}

/// Migration events carry the full target configuration.
pub type IdpMigrated<C> = IdpAdded<C>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpChanged<C> {
    pub id: IdpId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: IdpOptionChanges,
    #[serde(flatten)]
    pub config: C,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpConfigChanged {
    pub id: IdpId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub styling_type: Option<StylingType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpRef {
    pub id: IdpId,
}

event_union! {
    pub enum IdpEvent {
        OidcAdded(IdpAdded<OidcConfig>) = "instance.idp.oidc.added" | "org.idp.oidc.added",
        OidcChanged(IdpChanged<OidcConfigChanges>) =
            "instance.idp.oidc.changed" | "org.idp.oidc.changed",
        OidcMigratedAzure(IdpMigrated<AzureConfig>) =
            "instance.idp.oidc.migrated.azure" | "org.idp.oidc.migrated.azure",
        OidcMigratedGoogle(IdpMigrated<GoogleConfig>) =
            "instance.idp.oidc.migrated.google" | "org.idp.oidc.migrated.google",
        OAuthAdded(IdpAdded<OAuthConfig>) = "instance.idp.oauth.added" | "org.idp.oauth.added",
        OAuthChanged(IdpChanged<OAuthConfigChanges>) =
            "instance.idp.oauth.changed" | "org.idp.oauth.changed",
        JwtAdded(IdpAdded<JwtConfig>) = "instance.idp.jwt.added" | "org.idp.jwt.added",
        JwtChanged(IdpChanged<JwtConfigChanges>) =
            "instance.idp.jwt.changed" | "org.idp.jwt.changed",
        LdapAdded(IdpAdded<LdapConfig>) = "instance.idp.ldap.v2.added" | "org.idp.ldap.v2.added",
        LdapChanged(IdpChanged<LdapConfigChanges>) =
            "instance.idp.ldap.v2.changed" | "org.idp.ldap.v2.changed",
        SamlAdded(IdpAdded<SamlConfig>) = "instance.idp.saml.added" | "org.idp.saml.added",
        SamlChanged(IdpChanged<SamlConfigChanges>) =
            "instance.idp.saml.changed" | "org.idp.saml.changed",
        AppleAdded(IdpAdded<AppleConfig>) = "instance.idp.apple.added" | "org.idp.apple.added",
        AppleChanged(IdpChanged<AppleConfigChanges>) =
            "instance.idp.apple.changed" | "org.idp.apple.changed",
        GoogleAdded(IdpAdded<GoogleConfig>) = "instance.idp.google.added" | "org.idp.google.added",
        GoogleChanged(IdpChanged<GoogleConfigChanges>) =
            "instance.idp.google.changed" | "org.idp.google.changed",
        AzureAdded(IdpAdded<AzureConfig>) = "instance.idp.azure.added" | "org.idp.azure.added",
        AzureChanged(IdpChanged<AzureConfigChanges>) =
            "instance.idp.azure.changed" | "org.idp.azure.changed",
        GitHubAdded(IdpAdded<GitHubConfig>) = "instance.idp.github.added" | "org.idp.github.added",
        GitHubChanged(IdpChanged<GitHubConfigChanges>) =
            "instance.idp.github.changed" | "org.idp.github.changed",
        GitHubEnterpriseAdded(IdpAdded<GitHubEnterpriseConfig>) =
            "instance.idp.github_enterprise.added" | "org.idp.github_enterprise.added",
        GitHubEnterpriseChanged(IdpChanged<GitHubEnterpriseConfigChanges>) =
            "instance.idp.github_enterprise.changed" | "org.idp.github_enterprise.changed",
        GitLabAdded(IdpAdded<GitLabConfig>) = "instance.idp.gitlab.added" | "org.idp.gitlab.added",
        GitLabChanged(IdpChanged<GitLabConfigChanges>) =
            "instance.idp.gitlab.changed" | "org.idp.gitlab.changed",
        GitLabSelfHostedAdded(IdpAdded<GitLabSelfHostedConfig>) =
            "instance.idp.gitlab_self_hosted.added" | "org.idp.gitlab_self_hosted.added",
        GitLabSelfHostedChanged(IdpChanged<GitLabSelfHostedConfigChanges>) =
            "instance.idp.gitlab_self_hosted.changed" | "org.idp.gitlab_self_hosted.changed",
        ConfigChanged(IdpConfigChanged) = "instance.idp.config.changed" | "org.idp.config.changed",
        Deactivated(IdpRef) = "instance.idp.config.deactivated" | "org.idp.config.deactivated",
        Reactivated(IdpRef) = "instance.idp.config.reactivated" | "org.idp.config.reactivated",
        Removed(IdpRef) = "instance.idp.removed" | "org.idp.removed",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_events::Event;

    use super::*;

    fn secret(tag: &str) -> serde_json::Value {
        json!({"algorithm": "aes", "key_id": "k", "crypted": tag.as_bytes()})
    }

    #[test]
    fn added_payload_flattens_base_options_and_config() {
        let e = IdpEvent::decode(
            "org.idp.oidc.added",
            &json!({
                "id": "idp-1",
                "name": "corp",
                "allow_linking": true,
                "issuer": "issuer",
                "client_id": "clientID",
                "client_secret": secret("a"),
                "scopes": ["openid"]
            }),
        )
        .unwrap();
        let IdpEvent::OidcAdded(added) = e else {
            panic!("wrong variant");
        };
        assert!(added.options.allow_linking);
        assert!(!added.options.allow_creation);
        assert_eq!(added.config.issuer, "issuer");
        assert_eq!(added.config.scopes, vec!["openid".to_string()]);
    }

    #[test]
    fn changed_payload_leaves_absent_fields_untouched() {
        let e = IdpEvent::decode(
            "instance.idp.github.changed",
            &json!({"id": "idp-1", "scopes": ["user:email"]}),
        )
        .unwrap();
        let IdpEvent::GitHubChanged(changed) = e else {
            panic!("wrong variant");
        };
        assert!(changed.options.is_empty());

        let mut config = GitHubConfig {
            client_id: "cid".into(),
            client_secret: serde_json::from_value(secret("s")).unwrap(),
            scopes: vec![],
        };
        changed.config.apply_to(&mut config);
        assert_eq!(config.client_id, "cid");
        assert_eq!(config.scopes, vec!["user:email".to_string()]);
    }

    #[test]
    fn variant_extraction_checks_the_tag() {
        let config = IdpConfig::Google(GoogleConfig {
            client_id: "g".into(),
            client_secret: serde_json::from_value(secret("s")).unwrap(),
            scopes: vec![],
        });
        assert_eq!(config.idp_type(), IdpType::Google);
        assert!(OidcConfig::from_config(config.clone()).is_none());
        assert_eq!(GoogleConfig::from_config(config).unwrap().client_id, "g");
    }
}
