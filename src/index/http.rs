use std::time::Duration;

use reqwest::{blocking::RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{IndexError, IndexService};

/// Client for an index service hosted elsewhere.
///
/// Wire format (JSON bodies):
/// - `POST /documents`        `{"text", "item_id"}`
/// - `POST /documents/delete` `{"text"}`
/// - `POST /query`            `{"text"}` -> `{"ids": [..]}`
/// - `POST /resync`           409 while a rebuild is running
pub struct HttpIndex {
    remote_addr: String,
    basic_auth: Option<(String, Option<String>)>,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
struct QueryResponse {
    ids: Vec<u64>,
}

impl HttpIndex {
    pub fn new(
        addr: &str,
        basic_auth: Option<(String, Option<String>)>,
        timeout: Duration,
    ) -> Result<HttpIndex, IndexError> {
        let remote_addr = addr.strip_suffix("/").unwrap_or(addr).to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(HttpIndex {
            remote_addr,
            basic_auth,
            client,
        })
    }

    fn post(&self, url: &str) -> RequestBuilder {
        log::debug!("{}{}", self.remote_addr, url);
        let url = format!("{}{}", self.remote_addr, url);

        match self.basic_auth.clone() {
            Some((username, password)) => self.client.post(&url).basic_auth(username, password),
            None => self.client.post(&url),
        }
    }
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    log::error!("index service answered {status}: {message:?}");
    Err(IndexError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl IndexService for HttpIndex {
    fn add_document(&self, text: &str, item_id: u64) -> Result<(), IndexError> {
        let resp = self
            .post("/documents")
            .json(&json!({ "text": text, "item_id": item_id }))
            .send()?;

        check_status(resp)?;
        Ok(())
    }

    fn delete_document(&self, text: &str) -> Result<(), IndexError> {
        let resp = self
            .post("/documents/delete")
            .json(&json!({ "text": text }))
            .send()?;

        // deleting an absent document is fine
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        check_status(resp)?;
        Ok(())
    }

    fn query_ids(&self, text: &str) -> Result<Vec<u64>, IndexError> {
        let resp = self.post("/query").json(&json!({ "text": text })).send()?;

        let body = check_status(resp)?.text()?;
        let parsed: QueryResponse = serde_json::from_str(&body).map_err(|err| {
            log::error!("{err}. tried to parse: {body:?}");
            err
        })?;

        Ok(parsed.ids)
    }

    fn resynchronize(&self) -> Result<(), IndexError> {
        let resp = self.post("/resync").send()?;

        if resp.status() == StatusCode::CONFLICT {
            return Err(IndexError::AlreadyInProgress);
        }

        check_status(resp)?;
        Ok(())
    }
}
