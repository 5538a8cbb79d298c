use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use tentfan_common::{
    protocol::{
        ActuatorStatus, AuthAccepted, AuthRequest, ErrorBody, ScheduleAccepted, ScheduleListing,
        ScheduleRequest, SpeedAccepted, SpeedRequest, PATH_AUTH, PATH_SCHEDULE, PATH_SPEED,
        PATH_STATUS,
    },
    AccessDigest, CommandError, ScheduleEntry, SpeedCommand,
};

/// HTTP client for the fan actuator. Every request is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct ActuatorClient {
    base_url: String,
    client: Client,
}

impl ActuatorClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build actuator http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn status(&self) -> Result<ActuatorStatus, CommandError> {
        self.get_json(PATH_STATUS).await
    }

    pub async fn set_speed(&self, command: &SpeedCommand) -> Result<u8, CommandError> {
        let body = SpeedRequest::new(command.speed, &command.digest, command.mode);
        let accepted: SpeedAccepted = self.post_json(PATH_SPEED, &body).await?;
        Ok(accepted.speed)
    }

    pub async fn schedule(&self) -> Result<ScheduleListing, CommandError> {
        self.get_json(PATH_SCHEDULE).await
    }

    pub async fn set_schedule(
        &self,
        schedules: Vec<ScheduleEntry>,
        digest: &AccessDigest,
    ) -> Result<ScheduleAccepted, CommandError> {
        let body = ScheduleRequest::new(schedules, digest);
        self.post_json(PATH_SCHEDULE, &body).await
    }

    /// Side-effect free check of a digest against the actuator's own copy.
    pub async fn verify(&self, digest: &AccessDigest) -> Result<(), CommandError> {
        let body = AuthRequest::new(digest);
        let _: AuthAccepted = self.post_json(PATH_AUTH, &body).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CommandError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CommandError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CommandError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| CommandError::Unavailable(format!("unexpected response body: {err}")));
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CommandError::AuthRejected {
            status: status.as_u16(),
        },
        StatusCode::BAD_REQUEST => CommandError::Validation(message),
        _ => CommandError::Unavailable(format!("{status}: {message}")),
    })
}

fn transport_error(err: reqwest::Error) -> CommandError {
    if err.is_timeout() {
        CommandError::Unreachable("request timed out".to_string())
    } else {
        CommandError::Unreachable(err.to_string())
    }
}
