//! Security scheme generation.
//!
//! A pure mapping from declared schemes (name, kind, parameters) to the OpenAPI
//! scheme shapes. A kind that is not recognized still yields a scheme, carrying the
//! original kind and parameters as extensions.

use crate::config::{SchemeDeclaration, SecurityConfig};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OpenAPI Security Scheme object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub scheme_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Header, query or cookie name for `apiKey`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// HTTP auth scheme for `http`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(rename = "bearerFormat", skip_serializing_if = "Option::is_none")]
    pub bearer_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<OAuthFlows>,
    #[serde(rename = "openIdConnectUrl", skip_serializing_if = "Option::is_none")]
    pub open_id_connect_url: Option<String>,
    /// Original kind of an unrecognized declaration
    #[serde(rename = "x-kind", skip_serializing_if = "Option::is_none")]
    pub x_kind: Option<String>,
    #[serde(rename = "x-parameters", skip_serializing_if = "Option::is_none")]
    pub x_parameters: Option<BTreeMap<String, String>>,
}

impl SecurityScheme {
    fn of_type(scheme_type: &str) -> Self {
        Self {
            scheme_type: scheme_type.to_string(),
            description: None,
            name: None,
            location: None,
            scheme: None,
            bearer_format: None,
            flows: None,
            open_id_connect_url: None,
            x_kind: None,
            x_parameters: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthFlows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implicit: Option<OAuthFlow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<OAuthFlow>,
    #[serde(rename = "clientCredentials", skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<OAuthFlow>,
    #[serde(rename = "authorizationCode", skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<OAuthFlow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthFlow {
    #[serde(rename = "authorizationUrl", skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(rename = "tokenUrl", skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(rename = "refreshUrl", skip_serializing_if = "Option::is_none")]
    pub refresh_url: Option<String>,
    pub scopes: BTreeMap<String, String>,
}

pub struct SecuritySchemeGenerator;

impl SecuritySchemeGenerator {
    /// Every declared scheme, in declaration order
    pub fn generate(config: &SecurityConfig) -> IndexMap<String, SecurityScheme> {
        config
            .schemes
            .iter()
            .map(|(name, declaration)| (name.clone(), Self::scheme(declaration)))
            .collect()
    }

    pub fn scheme(declaration: &SchemeDeclaration) -> SecurityScheme {
        let param = |key: &str| declaration.params.get(key).cloned();
        let kind = declaration.kind.to_ascii_lowercase();

        let mut scheme = match kind.as_str() {
            "apikey" | "api_key" | "api-key" => {
                let mut scheme = SecurityScheme::of_type("apiKey");
                scheme.name = Some(param("name").unwrap_or_else(|| "X-API-Key".to_string()));
                scheme.location = Some(param("in").unwrap_or_else(|| "header".to_string()));
                scheme
            }
            "bearer" | "jwt" | "token" => {
                let mut scheme = SecurityScheme::of_type("http");
                scheme.scheme = Some("bearer".to_string());
                scheme.bearer_format = param("bearer_format")
                    .or_else(|| (kind == "jwt").then(|| "JWT".to_string()));
                scheme
            }
            "basic" | "http" => {
                let mut scheme = SecurityScheme::of_type("http");
                scheme.scheme = Some(param("scheme").unwrap_or_else(|| "basic".to_string()));
                scheme
            }
            "oauth2" | "oauth" => {
                let mut scheme = SecurityScheme::of_type("oauth2");
                scheme.flows = Some(Self::flows(declaration));
                scheme
            }
            "openidconnect" | "openid" | "oidc" => {
                let mut scheme = SecurityScheme::of_type("openIdConnect");
                scheme.open_id_connect_url = param("url");
                scheme
            }
            _ => {
                debug!("Unrecognized security scheme kind `{}`", declaration.kind);
                let mut scheme = SecurityScheme::of_type("apiKey");
                scheme.name = Some(param("name").unwrap_or_else(|| "Authorization".to_string()));
                scheme.location = Some(param("in").unwrap_or_else(|| "header".to_string()));
                scheme.x_kind = Some(declaration.kind.clone());
                scheme.x_parameters = Some(declaration.params.clone());
                scheme
            }
        };
        scheme.description = param("description");
        scheme
    }

    fn flows(declaration: &SchemeDeclaration) -> OAuthFlows {
        let param = |key: &str| declaration.params.get(key).cloned();
        let scopes: BTreeMap<String, String> = param("scopes")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (s.to_string(), String::new()))
            .collect();
        let flow = OAuthFlow {
            authorization_url: param("authorization_url"),
            token_url: param("token_url"),
            refresh_url: param("refresh_url"),
            scopes,
        };

        let mut flows = OAuthFlows::default();
        match param("flow").as_deref() {
            Some("implicit") => flows.implicit = Some(flow),
            Some("password") => flows.password = Some(flow),
            Some("client_credentials") | Some("clientCredentials") => {
                flows.client_credentials = Some(flow)
            }
            _ => flows.authorization_code = Some(flow),
        }
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(declaration: SchemeDeclaration) -> serde_json::Value {
        serde_json::to_value(SecuritySchemeGenerator::scheme(&declaration)).unwrap()
    }

    #[test]
    fn test_known_kinds() {
        assert_eq!(
            render(SchemeDeclaration::new("api_key").param("name", "X-Token")),
            json!({"type": "apiKey", "name": "X-Token", "in": "header"})
        );
        assert_eq!(
            render(SchemeDeclaration::new("jwt")),
            json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"})
        );
        assert_eq!(
            render(SchemeDeclaration::new("basic")),
            json!({"type": "http", "scheme": "basic"})
        );
    }

    #[test]
    fn test_oauth2_flow() {
        let value = render(
            SchemeDeclaration::new("oauth2")
                .param("flow", "client_credentials")
                .param("token_url", "https://auth.example.com/token")
                .param("scopes", "read, write"),
        );
        assert_eq!(
            value,
            json!({
                "type": "oauth2",
                "flows": {
                    "clientCredentials": {
                        "tokenUrl": "https://auth.example.com/token",
                        "scopes": {"read": "", "write": ""}
                    }
                }
            })
        );
    }

    #[test]
    fn test_unrecognized_kind_is_kept_as_placeholder() {
        let value = render(SchemeDeclaration::new("hmac").param("header", "X-Signature"));
        assert_eq!(value["type"], "apiKey");
        assert_eq!(value["x-kind"], "hmac");
        assert_eq!(value["x-parameters"], json!({"header": "X-Signature"}));
    }

    #[test]
    fn test_generate_keeps_declaration_order() {
        let mut config = SecurityConfig::default();
        config
            .schemes
            .insert("zeta".to_string(), SchemeDeclaration::new("bearer"));
        config
            .schemes
            .insert("alpha".to_string(), SchemeDeclaration::new("basic"));
        let names: Vec<String> = SecuritySchemeGenerator::generate(&config)
            .keys()
            .cloned()
            .collect();
        assert_eq!(names, vec!["zeta".to_string(), "alpha".to_string()]);
    }
}
