//! Policy settings shared between an instance and its organizations.
//!
//! Instance events (`instance.policy.*`) create the defaults every org
//! inherits; org events (`org.policy.*`) create an override that shadows the
//! default until the matching `removed` event resets it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use warden_events::event_union;

/// Policy families.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsKind {
    Login,
    Label,
    PasswordComplexity,
    PasswordExpiry,
    Domain,
    Lockout,
    Security,
    Organization,
    SecretGenerator,
}

impl SettingsKind {
    pub const ALL: [SettingsKind; 9] = [
        SettingsKind::Login,
        SettingsKind::Label,
        SettingsKind::PasswordComplexity,
        SettingsKind::PasswordExpiry,
        SettingsKind::Domain,
        SettingsKind::Lockout,
        SettingsKind::Security,
        SettingsKind::Organization,
        SettingsKind::SecretGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsKind::Login => "login",
            SettingsKind::Label => "label",
            SettingsKind::PasswordComplexity => "password_complexity",
            SettingsKind::PasswordExpiry => "password_expiry",
            SettingsKind::Domain => "domain",
            SettingsKind::Lockout => "lockout",
            SettingsKind::Security => "security",
            SettingsKind::Organization => "organization",
            SettingsKind::SecretGenerator => "secret_generator",
        }
    }
}

impl core::fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label settings are edited as a preview and published by activation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelState {
    Preview,
    Activated,
}

impl LabelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelState::Preview => "preview",
            LabelState::Activated => "activated",
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordlessType {
    #[default]
    NotAllowed,
    Allowed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiFactorType {
    U2fWithPin,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorType {
    Totp,
    U2f,
    OtpEmail,
    OtpSms,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeMode {
    #[default]
    Auto,
    Light,
    Dark,
}

with_changes! {
    pub struct LoginSettings / LoginSettingsChanges {
        #[serde(default)]
        pub allow_username_password: bool,
        #[serde(default)]
        pub allow_register: bool,
        #[serde(default)]
        pub allow_external_idp: bool,
        #[serde(default)]
        pub force_mfa: bool,
        #[serde(default)]
        pub force_mfa_local_only: bool,
        #[serde(default)]
        pub hide_password_reset: bool,
        #[serde(default)]
        pub ignore_unknown_usernames: bool,
        #[serde(default)]
        pub allow_domain_discovery: bool,
        #[serde(default)]
        pub disable_login_with_email: bool,
        #[serde(default)]
        pub disable_login_with_phone: bool,
        #[serde(default)]
        pub passwordless_type: PasswordlessType,
        #[serde(default)]
        pub default_redirect_uri: Option<String>,
        #[serde(default)]
        pub password_check_lifetime_secs: i64,
        #[serde(default)]
        pub external_login_check_lifetime_secs: i64,
        #[serde(default)]
        pub mfa_init_skip_lifetime_secs: i64,
        #[serde(default)]
        pub second_factor_check_lifetime_secs: i64,
        #[serde(default)]
        pub multi_factor_check_lifetime_secs: i64,
        #[serde(default)]
        pub mfa_types: Vec<MultiFactorType>,
        #[serde(default)]
        pub second_factors: Vec<SecondFactorType>,
    }
}

impl LoginSettings {
    pub fn add_multi_factor(&mut self, factor: MultiFactorType) {
        if !self.mfa_types.contains(&factor) {
            self.mfa_types.push(factor);
        }
    }

    pub fn remove_multi_factor(&mut self, factor: MultiFactorType) {
        self.mfa_types.retain(|f| *f != factor);
    }

    pub fn add_second_factor(&mut self, factor: SecondFactorType) {
        if !self.second_factors.contains(&factor) {
            self.second_factors.push(factor);
        }
    }

    pub fn remove_second_factor(&mut self, factor: SecondFactorType) {
        self.second_factors.retain(|f| *f != factor);
    }
}

with_changes! {
    pub struct LabelSettings / LabelSettingsChanges {
        #[serde(default)]
        pub primary_color: String,
        #[serde(default)]
        pub background_color: String,
        #[serde(default)]
        pub warn_color: String,
        #[serde(default)]
        pub font_color: String,
        #[serde(default)]
        pub primary_color_dark: String,
        #[serde(default)]
        pub background_color_dark: String,
        #[serde(default)]
        pub warn_color_dark: String,
        #[serde(default)]
        pub font_color_dark: String,
        #[serde(default)]
        pub hide_login_name_suffix: bool,
        #[serde(default)]
        pub error_msg_popup: bool,
        #[serde(default)]
        pub disable_watermark: bool,
        #[serde(default)]
        pub theme_mode: ThemeMode,
    }
}

/// Storage keys of uploaded label assets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelAssets {
    pub logo_light: Option<String>,
    pub logo_dark: Option<String>,
    pub icon_light: Option<String>,
    pub icon_dark: Option<String>,
    pub font: Option<String>,
}

with_changes! {
    pub struct PasswordComplexitySettings / PasswordComplexitySettingsChanges {
        pub min_length: u32,
        #[serde(default)]
        pub has_lowercase: bool,
        #[serde(default)]
        pub has_uppercase: bool,
        #[serde(default)]
        pub has_number: bool,
        #[serde(default)]
        pub has_symbol: bool,
    }
}

with_changes! {
    pub struct PasswordExpirySettings / PasswordExpirySettingsChanges {
        #[serde(default)]
        pub expire_warn_days: u32,
        #[serde(default)]
        pub max_age_days: u32,
    }
}

with_changes! {
    pub struct DomainSettings / DomainSettingsChanges {
        #[serde(default)]
        pub user_login_must_be_domain: bool,
        #[serde(default)]
        pub validate_org_domains: bool,
        #[serde(default)]
        pub smtp_sender_address_matches_instance_domain: bool,
    }
}

with_changes! {
    pub struct LockoutSettings / LockoutSettingsChanges {
        #[serde(default)]
        pub max_password_attempts: u32,
        #[serde(default)]
        pub max_otp_attempts: u32,
        #[serde(default)]
        pub show_lockout_failures: bool,
    }
}

with_changes! {
    pub struct SecuritySettings / SecuritySettingsChanges {
        #[serde(default)]
        pub enabled: bool,
        #[serde(default)]
        pub enable_iframe_embedding: bool,
        #[serde(default)]
        pub allowed_origins: Vec<String>,
        #[serde(default)]
        pub enable_impersonation: bool,
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            enable_iframe_embedding: false,
            allowed_origins: Vec::new(),
            enable_impersonation: false,
        }
    }
}

with_changes! {
    #[derive(Default)]
    pub struct OrganizationSettings / OrganizationSettingsChanges {
        #[serde(default)]
        pub organization_scoped_usernames: bool,
    }
}

/// What a secret generator produces codes for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretGeneratorType {
    ClientSecret,
    InitializeUserCode,
    EmailVerificationCode,
    PhoneVerificationCode,
    PasswordVerificationCode,
    PasswordlessInitCode,
    DomainVerification,
    OtpSms,
    OtpEmail,
    AppSecret,
    InviteCode,
    SigningKey,
}

impl SecretGeneratorType {
    /// Domain verification tokens never expire.
    pub fn expires(&self) -> bool {
        *self != SecretGeneratorType::DomainVerification
    }
}

with_changes! {
    pub struct SecretGeneratorConfig / SecretGeneratorConfigChanges {
        pub length: u32,
        /// Zero when codes do not expire.
        #[serde(default)]
        pub expiry_secs: u64,
        #[serde(default)]
        pub include_lower_letters: bool,
        #[serde(default)]
        pub include_upper_letters: bool,
        #[serde(default)]
        pub include_digits: bool,
        #[serde(default)]
        pub include_symbols: bool,
    }
}

/// Every configured generator of one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretGeneratorSettings {
    pub generators: BTreeMap<SecretGeneratorType, SecretGeneratorConfig>,
}

impl SecretGeneratorSettings {
    pub fn generator(&self, generator_type: SecretGeneratorType) -> Option<&SecretGeneratorConfig> {
        self.generators.get(&generator_type)
    }

    /// Insert or replace one generator. Expiry is dropped for types whose
    /// codes never expire.
    pub fn set(&mut self, generator_type: SecretGeneratorType, mut config: SecretGeneratorConfig) {
        if !generator_type.expires() {
            config.expiry_secs = 0;
        }
        self.generators.insert(generator_type, config);
    }

    pub fn change(
        &mut self,
        generator_type: SecretGeneratorType,
        changes: SecretGeneratorConfigChanges,
    ) {
        if let Some(config) = self.generators.get_mut(&generator_type) {
            changes.apply_to(config);
            if !generator_type.expires() {
                config.expiry_secs = 0;
            }
        }
    }

    pub fn remove(&mut self, generator_type: SecretGeneratorType) {
        self.generators.remove(&generator_type);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretGeneratorAdded {
    pub generator_type: SecretGeneratorType,
    #[serde(flatten)]
    pub config: SecretGeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretGeneratorChanged {
    pub generator_type: SecretGeneratorType,
    #[serde(flatten)]
    pub changes: SecretGeneratorConfigChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretGeneratorRemoved {
    pub generator_type: SecretGeneratorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFactorEntry {
    pub mfa_type: MultiFactorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondFactorEntry {
    pub factor: SecondFactorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelAssetAdded {
    pub storage_key: String,
}

/// Payload-less settings events (reset, activation, asset removal).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsMarker {}

event_union! {
    pub enum SettingsEvent {
        LoginAdded(LoginSettings) = "instance.policy.login.added" | "org.policy.login.added",
        LoginChanged(LoginSettingsChanges) =
            "instance.policy.login.changed" | "org.policy.login.changed",
        LoginRemoved(SettingsMarker) = "org.policy.login.removed",
        MultiFactorAdded(MultiFactorEntry) =
            "instance.policy.login.multifactor.added" | "org.policy.login.multifactor.added",
        MultiFactorRemoved(MultiFactorEntry) =
            "instance.policy.login.multifactor.removed" | "org.policy.login.multifactor.removed",
        SecondFactorAdded(SecondFactorEntry) =
            "instance.policy.login.secondfactor.added" | "org.policy.login.secondfactor.added",
        SecondFactorRemoved(SecondFactorEntry) =
            "instance.policy.login.secondfactor.removed" | "org.policy.login.secondfactor.removed",

        LabelAdded(LabelSettings) = "instance.policy.label.added" | "org.policy.label.added",
        LabelChanged(LabelSettingsChanges) =
            "instance.policy.label.changed" | "org.policy.label.changed",
        LabelActivated(SettingsMarker) =
            "instance.policy.label.activated" | "org.policy.label.activated",
        LabelRemoved(SettingsMarker) = "org.policy.label.removed",
        LogoAdded(LabelAssetAdded) =
            "instance.policy.label.logo.added" | "org.policy.label.logo.added",
        LogoRemoved(SettingsMarker) =
            "instance.policy.label.logo.removed" | "org.policy.label.logo.removed",
        LogoDarkAdded(LabelAssetAdded) =
            "instance.policy.label.logo.dark.added" | "org.policy.label.logo.dark.added",
        LogoDarkRemoved(SettingsMarker) =
            "instance.policy.label.logo.dark.removed" | "org.policy.label.logo.dark.removed",
        IconAdded(LabelAssetAdded) =
            "instance.policy.label.icon.added" | "org.policy.label.icon.added",
        IconRemoved(SettingsMarker) =
            "instance.policy.label.icon.removed" | "org.policy.label.icon.removed",
        IconDarkAdded(LabelAssetAdded) =
            "instance.policy.label.icon.dark.added" | "org.policy.label.icon.dark.added",
        IconDarkRemoved(SettingsMarker) =
            "instance.policy.label.icon.dark.removed" | "org.policy.label.icon.dark.removed",
        FontAdded(LabelAssetAdded) =
            "instance.policy.label.font.added" | "org.policy.label.font.added",
        FontRemoved(SettingsMarker) =
            "instance.policy.label.font.removed" | "org.policy.label.font.removed",

        PasswordComplexityAdded(PasswordComplexitySettings) =
            "instance.policy.password.complexity.added" | "org.policy.password.complexity.added",
        PasswordComplexityChanged(PasswordComplexitySettingsChanges) =
            "instance.policy.password.complexity.changed"
            | "org.policy.password.complexity.changed",
        PasswordComplexityRemoved(SettingsMarker) = "org.policy.password.complexity.removed",

        PasswordExpiryAdded(PasswordExpirySettings) =
            "instance.policy.password.age.added" | "org.policy.password.age.added",
        PasswordExpiryChanged(PasswordExpirySettingsChanges) =
            "instance.policy.password.age.changed" | "org.policy.password.age.changed",
        PasswordExpiryRemoved(SettingsMarker) = "org.policy.password.age.removed",

        DomainAdded(DomainSettings) = "instance.policy.domain.added" | "org.policy.domain.added",
        DomainChanged(DomainSettingsChanges) =
            "instance.policy.domain.changed" | "org.policy.domain.changed",
        DomainRemoved(SettingsMarker) = "org.policy.domain.removed",

        LockoutAdded(LockoutSettings) =
            "instance.policy.lockout.added" | "org.policy.lockout.added",
        LockoutChanged(LockoutSettingsChanges) =
            "instance.policy.lockout.changed" | "org.policy.lockout.changed",
        LockoutRemoved(SettingsMarker) = "org.policy.lockout.removed",

        SecuritySet(SecuritySettingsChanges) = "instance.security.policy.set",

        OrganizationSet(OrganizationSettingsChanges) =
            "instance.settings.organization.set" | "org.settings.organization.set",
        OrganizationRemoved(SettingsMarker) = "org.settings.organization.removed",

        SecretGeneratorAdded(SecretGeneratorAdded) = "instance.secret.generator.added",
        SecretGeneratorChanged(SecretGeneratorChanged) = "instance.secret.generator.changed",
        SecretGeneratorRemoved(SecretGeneratorRemoved) = "instance.secret.generator.removed",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_events::Event;

    use super::*;

    #[test]
    fn instance_and_org_tags_decode_to_the_same_variant() {
        let payload = json!({"min_length": 12, "has_symbol": true});
        for tag in [
            "instance.policy.password.complexity.added",
            "org.policy.password.complexity.added",
        ] {
            let e = SettingsEvent::decode(tag, &payload).unwrap();
            let SettingsEvent::PasswordComplexityAdded(s) = e else {
                panic!("wrong variant for {tag}");
            };
            assert_eq!(s.min_length, 12);
            assert!(s.has_symbol);
            assert!(!s.has_number);
        }
    }

    #[test]
    fn instance_settings_have_no_reset() {
        assert!(
            SettingsEvent::decode("instance.policy.lockout.removed", &json!({})).is_err()
        );
    }

    #[test]
    fn factor_lists_stay_unique_and_ordered() {
        let mut login: LoginSettings = serde_json::from_value(json!({})).unwrap();
        login.add_second_factor(SecondFactorType::Totp);
        login.add_second_factor(SecondFactorType::OtpSms);
        login.add_second_factor(SecondFactorType::Totp);
        assert_eq!(
            login.second_factors,
            vec![SecondFactorType::Totp, SecondFactorType::OtpSms]
        );
        login.remove_second_factor(SecondFactorType::Totp);
        assert_eq!(login.second_factors, vec![SecondFactorType::OtpSms]);
    }

    #[test]
    fn secret_generator_payloads_carry_their_type() {
        let added = SettingsEvent::decode(
            "instance.secret.generator.added",
            &json!({
                "generator_type": "domain_verification",
                "length": 32,
                "expiry_secs": 600,
                "include_digits": true
            }),
        )
        .unwrap();
        let SettingsEvent::SecretGeneratorAdded(added) = added else {
            panic!("wrong variant");
        };
        assert_eq!(added.generator_type, SecretGeneratorType::DomainVerification);

        let mut generators = SecretGeneratorSettings::default();
        generators.set(added.generator_type, added.config);
        let config = generators.generator(SecretGeneratorType::DomainVerification).unwrap();
        assert_eq!(config.length, 32);
        assert_eq!(config.expiry_secs, 0);
        assert!(config.include_digits && !config.include_symbols);
    }

    #[test]
    fn changing_an_unknown_generator_does_nothing() {
        let mut generators = SecretGeneratorSettings::default();
        let changes: SecretGeneratorConfigChanges =
            serde_json::from_value(json!({"length": 8})).unwrap();
        generators.change(SecretGeneratorType::OtpSms, changes);
        assert!(generators.generators.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn changes_touch_only_named_fields(min_length in 1u32..64, has_symbol: bool) {
            let mut settings: PasswordComplexitySettings =
                serde_json::from_value(json!({"min_length": 8, "has_number": true})).unwrap();
            let before = settings.clone();

            PasswordComplexitySettingsChanges::default().apply_to(&mut settings);
            proptest::prop_assert_eq!(&settings, &before);

            let changes = PasswordComplexitySettingsChanges {
                min_length: Some(min_length),
                has_symbol: Some(has_symbol),
                ..Default::default()
            };
            changes.apply_to(&mut settings);
            proptest::prop_assert_eq!(settings.min_length, min_length);
            proptest::prop_assert_eq!(settings.has_symbol, has_symbol);
            proptest::prop_assert_eq!(settings.has_number, before.has_number);
        }
    }
}
