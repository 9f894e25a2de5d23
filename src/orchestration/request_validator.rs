//! # Request Validator
//!
//! Filters a batch of raw submissions. A submission becomes a [`Request`] only
//! if it names an owner, a content type and a session, its content type is
//! not auto-skipped for the tenant, and its request id is not already live in
//! the store or earlier in the same batch.
//!
//! Validation is pure: the caller looks up existing ids beforehand and
//! publishes the skip notifications afterwards.

use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::constants::{headers, messages};
use crate::messaging::RequestEvent;
use crate::models::Request;
use crate::sessions::SkippedRequest;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    /// New requests in submission order, ready for a dispatch pass
    pub accepted: Vec<Request>,
    pub skipped: Vec<SkippedRequest>,
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    tenant: String,
    skip_content_types: HashSet<String>,
}

impl RequestValidator {
    pub fn new<I, S>(tenant: impl Into<String>, skip_content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tenant: tenant.into(),
            skip_content_types: skip_content_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.tenant.name.clone(),
            config.settings.skip_content_types.iter().cloned(),
        )
    }

    /// Request ids worth checking against the store
    pub fn candidate_ids(events: &[RequestEvent]) -> Vec<String> {
        let mut ids: Vec<String> = events.iter().filter_map(|e| e.request_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Split `events` into accepted requests and skipped submissions.
    /// `existing` holds the ids already present in the store.
    pub fn validate(&self, events: &[RequestEvent], existing: &HashSet<String>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();

        for event in events {
            let errors = self.check(event, existing, &seen);
            if !errors.is_empty() {
                warn!(
                    request_id = event.request_id.as_deref().unwrap_or("undefined"),
                    causes = %errors.join(","),
                    "Skipped request"
                );
                outcome.skipped.push(SkippedRequest {
                    request_id: event.request_id.clone(),
                    source: event.owner.clone(),
                    session: event.session.clone(),
                    content_type: event.content_type.clone(),
                    messages: errors,
                });
                continue;
            }

            let request_id = event
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            seen.insert(request_id.clone());

            // The header checks above guarantee these are present.
            let (Some(owner), Some(content_type), Some(session)) =
                (&event.owner, &event.content_type, &event.session)
            else {
                continue;
            };
            outcome.accepted.push(
                Request::new(
                    request_id,
                    content_type.clone(),
                    owner.clone(),
                    session.clone(),
                    event.content.clone(),
                )
                .with_additional_headers(event.additional_headers.clone()),
            );
        }

        outcome
    }

    fn check(
        &self,
        event: &RequestEvent,
        existing: &HashSet<String>,
        seen: &HashSet<String>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if event.owner.is_none() {
            errors.push(messages::format(messages::MISSING_HEADER, &[headers::OWNER]));
        }
        match &event.content_type {
            None => errors.push(messages::format(
                messages::MISSING_HEADER,
                &[headers::CONTENT_TYPE],
            )),
            Some(content_type) if self.skip_content_types.contains(content_type) => {
                errors.push(messages::format(
                    messages::SKIPPED_CONTENT_TYPE,
                    &[content_type.as_str(), self.tenant.as_str()],
                ))
            }
            Some(_) => {}
        }
        if event.session.is_none() {
            errors.push(messages::format(messages::MISSING_HEADER, &[headers::SESSION]));
        }
        if let Some(request_id) = &event.request_id {
            if existing.contains(request_id) || seen.contains(request_id) {
                errors.push(messages::format(
                    messages::REQUEST_ID_ALREADY_EXISTS,
                    &[request_id.as_str()],
                ));
            }
        }

        errors
    }
}
