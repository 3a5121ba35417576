use async_trait::async_trait;
use aws_sdk_route53::{
    model::{
        Change, ChangeAction as Route53Action, ChangeBatch, ChangeInfo,
        ChangeStatus as Route53Status, ResourceRecord, ResourceRecordSet, RrType,
    },
    types::{DateTime as SmithyDateTime, SdkError},
    Client,
};
use aws_types::SdkConfig;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};

use crate::change::{ChangeAction, ChangeReceipt, ChangeRequest, ChangeStatus, RecordType};
use crate::errors::ApiError;

/// Error codes Route 53 returns for requests worth repeating.
const RETRYABLE_CODES: &[&str] = &["Throttling", "PriorRequestNotComplete"];

/// Authoritative store of a hosted zone's records.
#[async_trait]
pub trait ZoneApi: Send + Sync {
    /// Submits a single-change batch.
    async fn change_record_sets(
        &self,
        zone_id: &str,
        comment: Option<&str>,
        request: &ChangeRequest,
    ) -> Result<ChangeReceipt, ApiError>;

    async fn get_change(&self, change_id: &str) -> Result<ChangeStatus, ApiError>;
}

pub struct Route53Zone {
    client: Client,
}

impl Route53Zone {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl ZoneApi for Route53Zone {
    async fn change_record_sets(
        &self,
        zone_id: &str,
        comment: Option<&str>,
        request: &ChangeRequest,
    ) -> Result<ChangeReceipt, ApiError> {
        debug!(
            "{:?} {} {} {:?} in zone '{}'",
            request.action, request.name, request.record_type, request.values, zone_id
        );
        let records = request
            .values
            .iter()
            .map(|value| ResourceRecord::builder().value(value).build())
            .collect();
        let record_set = ResourceRecordSet::builder()
            .name(&request.name)
            .r#type(rr_type(request.record_type))
            .ttl(i64::from(request.ttl))
            .set_resource_records(Some(records))
            .build();
        let batch = ChangeBatch::builder()
            .set_comment(comment.map(String::from))
            .changes(
                Change::builder()
                    .action(change_action(request.action))
                    .resource_record_set(record_set)
                    .build(),
            )
            .build();

        let result = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await;
        let output = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                return Err(ApiError {
                    message: format!("ChangeResourceRecordSets rejected: {}", err),
                    is_retryable: err.code().map_or(false, is_retryable_code),
                });
            }
            Err(err) => {
                return Err(ApiError {
                    is_retryable: is_error_retryable(&err),
                    message: format!("failed ChangeResourceRecordSets: {}", err),
                })
            }
        };

        let info = match output.change_info() {
            Some(info) => info,
            None => return Err(ApiError::fatal("response carried no change info")),
        };
        let receipt = receipt_from(info, request)?;
        info!(
            "submitted change '{}' for {} ({})",
            receipt.change_id, request.name, receipt.status
        );
        Ok(receipt)
    }

    async fn get_change(&self, change_id: &str) -> Result<ChangeStatus, ApiError> {
        let result = self.client.get_change().id(change_id).send().await;
        let output = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                return Err(ApiError {
                    message: format!("GetChange {} failed: {}", change_id, err),
                    is_retryable: err.code().map_or(false, is_retryable_code),
                });
            }
            Err(err) => {
                return Err(ApiError {
                    is_retryable: is_error_retryable(&err),
                    message: format!("failed GetChange {}: {}", change_id, err),
                })
            }
        };

        match output.change_info().and_then(|info| info.status()) {
            Some(status) => Ok(change_status(status)),
            None => Err(ApiError::retryable(format!(
                "GetChange {} returned no status",
                change_id
            ))),
        }
    }
}

fn receipt_from(info: &ChangeInfo, request: &ChangeRequest) -> Result<ChangeReceipt, ApiError> {
    let change_id = match info.id() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(ApiError::fatal("response carried no change id")),
    };
    let submitted_at = match info.submitted_at().and_then(to_chrono) {
        Some(submitted_at) => submitted_at,
        None => {
            warn!("change '{}' has no SubmittedAt, using local clock", change_id);
            Utc::now()
        }
    };
    let status = info.status().map_or(ChangeStatus::Pending, change_status);

    Ok(ChangeReceipt {
        change_id,
        submitted_at,
        status,
        target: request.target(),
    })
}

fn to_chrono(timestamp: &SmithyDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp.secs(), timestamp.subsec_nanos())
        .single()
}

fn change_status(status: &Route53Status) -> ChangeStatus {
    match status {
        Route53Status::Insync => ChangeStatus::InSync,
        _ => ChangeStatus::Pending,
    }
}

fn change_action(action: ChangeAction) -> Route53Action {
    match action {
        ChangeAction::Create => Route53Action::Create,
        ChangeAction::Upsert => Route53Action::Upsert,
        ChangeAction::Delete => Route53Action::Delete,
    }
}

fn rr_type(record_type: RecordType) -> RrType {
    match record_type {
        RecordType::A => RrType::A,
        RecordType::Aaaa => RrType::Aaaa,
        RecordType::Caa => RrType::Caa,
        RecordType::Cname => RrType::Cname,
        RecordType::Mx => RrType::Mx,
        RecordType::Ns => RrType::Ns,
        RecordType::Ptr => RrType::Ptr,
        RecordType::Spf => RrType::Spf,
        RecordType::Srv => RrType::Srv,
        RecordType::Txt => RrType::Txt,
    }
}

fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_CODES.contains(&code)
}

#[inline]
pub fn is_error_retryable<E, R>(e: &SdkError<E, R>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::ResponseError { .. } => true,
        SdkError::DispatchFailure(e) => e.is_timeout() || e.is_io(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_route53::{
        model::{ChangeInfo, ChangeStatus as Route53Status},
        types::DateTime as SmithyDateTime,
    };
    use chrono::{TimeZone, Utc};

    use super::{is_retryable_code, receipt_from};
    use crate::change::{ChangeAction, ChangeRequest, ChangeStatus, RecordType};

    fn request() -> ChangeRequest {
        ChangeRequest::new(
            "www.example.com",
            RecordType::A,
            vec![String::from("1.1.1.1")],
            60,
            ChangeAction::Upsert,
        )
        .unwrap()
    }

    #[test]
    fn receipt_uses_provider_timestamp() {
        let info = ChangeInfo::builder()
            .id("/change/C2682N5HXP0BZ4")
            .status(Route53Status::Pending)
            .submitted_at(SmithyDateTime::from_secs(1_456_826_400))
            .build();

        let receipt = receipt_from(&info, &request()).unwrap();
        assert_eq!("/change/C2682N5HXP0BZ4", receipt.change_id);
        assert_eq!(ChangeStatus::Pending, receipt.status);
        assert_eq!(
            Utc.with_ymd_and_hms(2016, 3, 1, 10, 0, 0).unwrap(),
            receipt.submitted_at
        );
        assert_eq!("www.example.com", receipt.target.name);
    }

    #[test]
    fn receipt_without_id_is_rejected() {
        let info = ChangeInfo::builder()
            .status(Route53Status::Insync)
            .build();

        let result = receipt_from(&info, &request());
        assert_eq!(true, result.is_err());
        assert_eq!(false, result.err().unwrap().is_retryable);
    }

    #[test]
    fn throttling_is_retryable() {
        assert_eq!(true, is_retryable_code("Throttling"));
        assert_eq!(true, is_retryable_code("PriorRequestNotComplete"));
        assert_eq!(false, is_retryable_code("InvalidChangeBatch"));
        assert_eq!(false, is_retryable_code("AccessDenied"));
    }
}
