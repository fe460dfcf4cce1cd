use chrono_tz::Tz;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::{CallbackPayload, CronSpec, DelayedDelivery, DeliveryError};

pub const DEFAULT_QSTASH_URL: &str = "https://qstash.upstash.io";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DELIVERY_RETRIES: &str = "3";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    schedule_id: String,
}

/// QStash REST client. Every delivery targets the one callback URL.
#[derive(Debug, Clone)]
pub struct QstashClient {
    base_url: String,
    token: String,
    callback_url: String,
    client: Client,
}

impl QstashClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            callback_url: callback_url.into(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    fn check(&self, response: Response, id: &str) -> Result<Response, DeliveryError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DeliveryError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl DelayedDelivery for QstashClient {
    fn publish_delayed(
        &self,
        payload: &CallbackPayload,
        delay: Duration,
    ) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint(&format!("publish/{}", self.callback_url)))
            .bearer_auth(&self.token)
            .header("Upstash-Delay", format!("{}s", delay.as_secs()))
            .header("Upstash-Retries", DELIVERY_RETRIES)
            .json(payload)
            .send()?;
        let body: PublishResponse = self.check(response, "publish")?.json()?;
        Ok(body.message_id)
    }

    fn create_schedule(
        &self,
        payload: &CallbackPayload,
        cron: &CronSpec,
        timezone: Tz,
    ) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint(&format!("schedules/{}", self.callback_url)))
            .bearer_auth(&self.token)
            .header("Upstash-Cron", cron.qstash_expression(timezone))
            .header("Upstash-Retries", DELIVERY_RETRIES)
            .json(payload)
            .send()?;
        let body: ScheduleResponse = self.check(response, "schedule")?.json()?;
        Ok(body.schedule_id)
    }

    fn cancel_message(&self, message_id: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("messages/{}", message_id)))
            .bearer_auth(&self.token)
            .send()?;
        self.check(response, message_id)?;
        Ok(())
    }

    fn delete_schedule(&self, schedule_id: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("schedules/{}", schedule_id)))
            .bearer_auth(&self.token)
            .send()?;
        self.check(response, schedule_id)?;
        Ok(())
    }
}
