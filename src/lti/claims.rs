//! Typed view of a verified LTI 1.3 launch assertion.
//!
//! IMS Global claims keep their namespaced JSON names so the structure
//! serializes back out exactly as the platform sent it. Anything not
//! modelled here is kept in [`LaunchClaims::extra`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

const LTI: &str = "https://purl.imsglobal.org/spec/lti/claim/";

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Audience(Vec<String>);

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        self.0.iter().any(|a| a == audience)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(aud) => Self(vec![aud]),
            OneOrMany::Many(auds) => Self(auds),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub context_type: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPlatform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_family_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchPresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformNotificationService {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_notification_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notice_types_supported: Vec<String>,
}

/// Assignment and Grade Services endpoint claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgsEndpoint {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineitems: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineitem: Option<String>,
}

/// Names and Role Provisioning Services claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamesRoleService {
    pub context_memberships_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lti1p1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Claims of a launch assertion whose signature, audience and expiry have
/// already been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub nonce: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: String,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/version",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: String,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_link_uri: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Vec<String>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_link: Option<ResourceLink>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/context",
        skip_serializing_if = "Option::is_none"
    )]
    pub context: Option<Context>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/tool_platform",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_platform: Option<ToolPlatform>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/launch_presentation",
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_presentation: Option<LaunchPresentation>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/platformnotificationservice",
        skip_serializing_if = "Option::is_none"
    )]
    pub platform_notification_service: Option<PlatformNotificationService>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/custom",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom: Option<Map<String, Value>>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/lti11_legacy_user_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub lti11_legacy_user_id: Option<String>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/lti1p1",
        skip_serializing_if = "Option::is_none"
    )]
    pub lti1p1: Option<Lti1p1>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub ags_endpoint: Option<AgsEndpoint>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice",
        skip_serializing_if = "Option::is_none"
    )]
    pub names_role_service: Option<NamesRoleService>,

    /// Claims without a typed field (vendor extensions such as
    /// `https://www.instructure.com/placement`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LaunchClaims {
    /// Look up an unmodelled claim by name, e.g. a vendor extension.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Whether the launching user holds a role ending in `role`
    /// (e.g. `"#Instructor"` or `"membership#Learner"`).
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.ends_with(role))
    }

    pub fn is_resource_link_launch(&self) -> bool {
        self.message_type == "LtiResourceLinkRequest"
    }

    /// Full claim name for a short LTI core claim (`"roles"` →
    /// `https://purl.imsglobal.org/spec/lti/claim/roles`).
    pub fn lti_claim_name(short: &str) -> String {
        format!("{}{}", LTI, short)
    }
}
