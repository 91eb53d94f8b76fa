//! Identity-provider repository and its typed per-protocol getters.

use warden_core::condition::columns;
use warden_core::{Condition, IdpId, InstanceId, OrgId, TextOperation};
use warden_identity::idp::{
    AppleConfig, AzureConfig, GitHubConfig, GitHubEnterpriseConfig, GitLabConfig,
    GitLabSelfHostedConfig, GoogleConfig, JwtConfig, LdapConfig, OAuthConfig, OidcConfig,
    SamlConfig,
};
use warden_identity::{IdpType, IdpVariant, LifecycleState};

use crate::projections::idp::IdpRow;
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, RepositoryError, RepositoryResult, instance_condition};

pub type IdpRepository<'a> = Repository<'a, IdpRow>;

/// A provider's base record together with its protocol payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IdpDetails<C> {
    pub idp: IdpRow,
    pub config: C,
}

impl<C: IdpVariant> IdpDetails<C> {
    pub fn idp_type(&self) -> IdpType {
        C::TYPE
    }
}

macro_rules! typed_getters {
    ($( $(#[$meta:meta])* $fn:ident => $config:ty ),+ $(,)?) => {
        impl<'a> Repository<'a, IdpRow> {
            $(
                $(#[$meta])*
                pub fn $fn(
                    &self,
                    instance_id: &InstanceId,
                    id: &IdpId,
                ) -> RepositoryResult<IdpDetails<$config>> {
                    self.get_typed::<$config>(instance_id, id)
                }
            )+
        }
    };
}

typed_getters! {
    get_oidc => OidcConfig,
    get_oauth => OAuthConfig,
    get_jwt => JwtConfig,
    get_ldap => LdapConfig,
    get_saml => SamlConfig,
    get_apple => AppleConfig,
    get_google => GoogleConfig,
    /// Azure AD, including providers migrated from generic OIDC.
    get_azure => AzureConfig,
    get_github => GitHubConfig,
    get_github_enterprise => GitHubEnterpriseConfig,
    get_gitlab => GitLabConfig,
    get_gitlab_self_hosted => GitLabSelfHostedConfig,
}

impl<'a> Repository<'a, IdpRow> {
    pub fn idps(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.idps())
    }

    /// The provider `id`, decoded as a `C`.
    pub fn get_typed<C: IdpVariant>(
        &self,
        instance_id: &InstanceId,
        id: &IdpId,
    ) -> RepositoryResult<IdpDetails<C>> {
        let idp = self.get(&Self::primary_key_condition(instance_id, id))?;
        let actual = idp.idp_type();
        match C::from_config(idp.config.clone()) {
            Some(config) => Ok(IdpDetails { idp, config }),
            None => Err(RepositoryError::IdpTypeMismatch {
                expected: C::TYPE,
                actual,
            }),
        }
    }

    pub fn primary_key_condition(instance_id: &InstanceId, id: &IdpId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, id))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    /// Providers configured on the instance rather than an org.
    pub fn instance_owned_condition() -> Condition {
        Condition::is_null(columns::ORG_ID)
    }

    pub fn name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(IdpRow::NAME, op, name)
    }

    pub fn type_condition(idp_type: IdpType) -> Condition {
        Condition::equal(IdpRow::TYPE, idp_type.as_str())
    }

    pub fn state_condition(state: LifecycleState) -> Condition {
        Condition::equal(columns::STATE, state.as_str())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::projections::idp::IdpProjection;
    use crate::test_support::{Events, apply_all, tables};

    #[test]
    fn typed_getter_rejects_other_protocols() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let added = events.instance(
            "instance.idp.gitlab.added",
            json!({
                "id": "idp-1",
                "name": "lab",
                "client_id": "c",
                "client_secret": {"algorithm": "aes", "key_id": "k1", "crypted": [1, 2]},
            }),
        );
        apply_all(&IdpProjection, &tables, &[added]);

        let repo = IdpRepository::idps(&tables);
        let instance_id = events.instance_id();
        let id = IdpId::from("idp-1");

        let gitlab = repo.get_gitlab(&instance_id, &id).unwrap();
        assert_eq!(gitlab.idp_type(), IdpType::GitLab);
        assert_eq!(gitlab.config.client_id, "c");

        let err = repo.get_github(&instance_id, &id).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::IdpTypeMismatch { expected: IdpType::GitHub, actual: IdpType::GitLab }
        ));
        assert!(repo.get_gitlab(&instance_id, &"idp-2".into()).unwrap_err().is_not_found());
    }
}
