use crate::error::{Error, Result};
use crate::source::{RegisteredSchema, RegistryReader, RegistryWriter};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchemaRequest<'a> {
    schema: &'a str,
    schema_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    id: i32,
    version: i32,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompatibilityBody {
    compatibility_level: Option<String>,
    // GET /config answers with `compatibility` on some registry versions
    #[serde(default, skip_serializing)]
    compatibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: Option<i32>,
    message: Option<String>,
}

/// Schema registry REST client.
///
/// Not meant to be shared between concurrent reconciliation passes; one
/// pass owns one client.
#[derive(Debug, Clone)]
pub struct RestRegistry {
    client: Client,
    base_url: Url,
}

impl RestRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid registry URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "Registry URL '{base_url}' cannot carry a path"
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(registry_error(status.as_u16(), &body))
    }
}

fn registry_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => Error::Registry {
            status,
            code: parsed.error_code,
            message: parsed.message.unwrap_or_else(|| body.to_string()),
        },
        Err(_) => Error::Registry {
            status,
            code: None,
            message: body.to_string(),
        },
    }
}

/// Map a 404 onto `None`, pass everything else through.
fn not_found_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl RegistryReader for RestRegistry {
    async fn lookup(
        &self,
        subject: &str,
        schema: &str,
        schema_type: &str,
    ) -> Result<Option<RegisteredSchema>> {
        let url = self.endpoint(&["subjects", subject]);
        debug!("POST {url}");
        let result = async {
            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .json(&SchemaRequest {
                    schema,
                    schema_type,
                })
                .send()
                .await?;
            let found: LookupResponse = Self::check(response).await?.json().await?;
            Ok::<_, Error>(RegisteredSchema {
                id: found.id,
                version: found.version,
            })
        }
        .await;
        not_found_as_none(result)
    }

    async fn versions(&self, subject: &str) -> Result<Vec<i32>> {
        let url = self.endpoint(&["subjects", subject, "versions"]);
        debug!("GET {url}");
        let result = async {
            let response = self.client.get(url).send().await?;
            let mut versions: Vec<i32> = Self::check(response).await?.json().await?;
            versions.sort_unstable();
            Ok::<_, Error>(versions)
        }
        .await;
        Ok(not_found_as_none(result)?.unwrap_or_default())
    }

    async fn compatibility(&self, subject: &str) -> Result<Option<String>> {
        let url = self.endpoint(&["config", subject]);
        debug!("GET {url}");
        let result = async {
            let response = self.client.get(url).send().await?;
            let body: CompatibilityBody = Self::check(response).await?.json().await?;
            Ok::<_, Error>(body.compatibility_level.or(body.compatibility))
        }
        .await;
        Ok(not_found_as_none(result)?.flatten())
    }

    async fn global_compatibility(&self) -> Result<Option<String>> {
        let url = self.endpoint(&["config"]);
        debug!("GET {url}");
        let response = self.client.get(url).send().await?;
        let body: CompatibilityBody = Self::check(response).await?.json().await?;
        Ok(body.compatibility_level.or(body.compatibility))
    }
}

#[async_trait]
impl RegistryWriter for RestRegistry {
    async fn register(
        &self,
        subject: &str,
        schema: &str,
        schema_type: &str,
    ) -> Result<RegisteredSchema> {
        let url = self.endpoint(&["subjects", subject, "versions"]);
        debug!("POST {url}");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&SchemaRequest {
                schema,
                schema_type,
            })
            .send()
            .await?;
        let registered: RegisterResponse = Self::check(response).await?.json().await?;

        // The register call only answers with the id
        self.lookup(subject, schema, schema_type)
            .await?
            .ok_or_else(|| Error::Registry {
                status: 404,
                code: None,
                message: format!(
                    "schema id {} registered under {subject} but not found on lookup",
                    registered.id
                ),
            })
    }

    async fn set_compatibility(&self, subject: &str, level: &str) -> Result<()> {
        let url = self.endpoint(&["config", subject]);
        debug!("PUT {url} {level}");
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&CompatibilityBody {
                compatibility_level: Some(level.to_string()),
                compatibility: None,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(url: &str) -> RestRegistry {
        RestRegistry::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_subject() {
        let r = registry("http://localhost:8081");
        assert_eq!(
            r.endpoint(&["subjects", "orders value", "versions"]).as_str(),
            "http://localhost:8081/subjects/orders%20value/versions"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let r = registry("https://registry.example.com/sr/");
        assert_eq!(
            r.endpoint(&["config"]).as_str(),
            "https://registry.example.com/sr/config"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(RestRegistry::new("not a url", Duration::from_secs(1)).is_err());
        assert!(RestRegistry::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_registry_error_body() {
        let err = registry_error(404, r#"{"error_code":40401,"message":"Subject not found."}"#);
        assert!(err.is_not_found());
        assert!(matches!(err, Error::Registry { code: Some(40401), .. }));

        let err = registry_error(500, "upstream exploded");
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Registry returned 500 (error code None): upstream exploded"
        );
    }

    #[test]
    fn test_compatibility_put_body() {
        let body = CompatibilityBody {
            compatibility_level: Some("FULL".to_string()),
            compatibility: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"compatibilityLevel":"FULL"}"#
        );
    }

    #[test]
    fn test_not_found_as_none() {
        let missing: Result<i32> = Err(registry_error(404, "{}"));
        assert_eq!(not_found_as_none(missing).unwrap(), None);
        assert_eq!(not_found_as_none(Ok(3)).unwrap(), Some(3));
    }
}
