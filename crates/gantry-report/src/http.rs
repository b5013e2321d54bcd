use crate::{ReportError, ServerConfig, StatusReporter};
use gantry_schema::{EventId, StageKind, StageResult};

/// Reports stage status to the Gantry server.
///
/// Endpoint: `POST /api/v1/events/<event>/stages/<stage>` with the JSON
/// `StageResult` as body. Any 2xx status is accepted.
pub struct HttpReporter {
    config: ServerConfig,
    agent: ureq::Agent,
}

impl HttpReporter {
    pub fn new(config: ServerConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn url(&self, event: &EventId, stage: StageKind) -> String {
        format!(
            "{}/api/v1/events/{}/stages/{}",
            self.config.url,
            event,
            stage.as_str()
        )
    }

    fn do_post(&self, url: &str, body: &[u8]) -> Result<(), ReportError> {
        let mut req = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Gantry-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.send(body) {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(ReportError::Rejected {
                    code,
                    url: url.to_owned(),
                });
            }
            Err(e) => return Err(ReportError::Http(e.to_string())),
        };
        let code = resp.status().as_u16();
        if code >= 300 {
            return Err(ReportError::Rejected {
                code,
                url: url.to_owned(),
            });
        }
        Ok(())
    }
}

impl StatusReporter for HttpReporter {
    fn report(
        &self,
        event: &EventId,
        stage: StageKind,
        result: &StageResult,
    ) -> Result<(), ReportError> {
        let url = self.url(event, stage);
        let body =
            serde_json::to_vec(result).map_err(|e| ReportError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} ({} {})", stage, result.status);
        self.do_post(&url, &body)
    }
}
