use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use aws_sdk_cloudformation::{
    model::{Output, StackStatus},
    types::SdkError,
};
use aws_types::SdkConfig;
use log::{debug, info};
use tokio::time::{sleep, Instant};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack not found")]
    NotFoundError(String),

    #[error("Stack {0} ended in {1}")]
    Failed(String, String),

    #[error("Stack {0} still {1} after {2:?}")]
    TimedOut(String, String, Duration),

    #[error("Unable to read template: {0}")]
    Template(String),
}

/// Where a stack status sits in the provisioning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    InProgress,
    Succeeded,
    Failed,
}

pub fn phase(status: &str) -> StackPhase {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE" => {
            StackPhase::Succeeded
        }
        _ if status.ends_with("_IN_PROGRESS") => StackPhase::InProgress,
        _ => StackPhase::Failed,
    }
}

pub struct Stack {
    pub stack_name: String,

    client: aws_sdk_cloudformation::Client,
}

impl Stack {
    pub fn new(stack_name: impl Into<String>, sdk_config: &SdkConfig) -> Self {
        let client = aws_sdk_cloudformation::Client::new(sdk_config);

        return Self {
            stack_name: stack_name.into(),
            client,
        };
    }

    /// Submits the template; returns the stack id.
    pub async fn create(&self, template_file: &Path) -> Result<String, Error> {
        let template_body = match tokio::fs::read_to_string(template_file).await {
            Ok(body) => body,
            Err(err) => {
                return Err(Error::Template(format!(
                    "{}: {}",
                    template_file.display(),
                    err
                )))
            }
        };

        info!("creating stack '{}'", self.stack_name);
        let result = self
            .client
            .create_stack()
            .stack_name(&self.stack_name)
            .template_body(template_body)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                return Err(Error::ServiceError(err.to_string()));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        let stack_id = result.stack_id().unwrap_or_default().to_string();
        info!("created stack '{}' with '{}'", self.stack_name, stack_id);
        return Ok(stack_id);
    }

    pub async fn describe(&self) -> Result<aws_sdk_cloudformation::model::Stack, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                return Err(Error::ServiceError(err.to_string()));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        match result.stacks().unwrap_or_else(|| &[]).first() {
            Some(stack) => Ok(stack.clone()),
            None => Err(Error::NotFoundError(self.stack_name.clone())),
        }
    }

    pub async fn get_outputs(&self) -> Result<Vec<Output>, Error> {
        let stack = self.describe().await?;
        let outputs = stack.outputs().unwrap_or_else(|| &[]).to_vec();

        return Ok(outputs);
    }

    /// Polls until the stack settles; `Failed` covers rollbacks and deletions.
    pub async fn wait(
        &self,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<Vec<Output>, Error> {
        let started = Instant::now();
        loop {
            let stack = self.describe().await?;
            let status = stack
                .stack_status()
                .map(StackStatus::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();

            match phase(&status) {
                StackPhase::Succeeded => {
                    info!("stack '{}' is {}", self.stack_name, status);
                    return Ok(stack.outputs().unwrap_or_else(|| &[]).to_vec());
                }
                StackPhase::Failed => return Err(Error::Failed(self.stack_name.clone(), status)),
                StackPhase::InProgress => {
                    debug!(
                        "stack '{}' is {} (elapsed {:?})",
                        self.stack_name,
                        status,
                        started.elapsed()
                    );
                }
            }

            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::TimedOut(self.stack_name.clone(), status, timeout));
                }
            }
            sleep(interval).await;
        }
    }
}

/// Outputs as a `key -> value` JSON object.
pub fn outputs_json(outputs: &[Output]) -> Result<String, serde_json::Error> {
    let init: HashMap<&str, &str> = HashMap::new();
    let contents = outputs.iter().fold(init, |mut acc, output| {
        if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
            acc.insert(key, value);
        }
        return acc;
    });

    serde_json::to_string_pretty(&contents)
}

#[cfg(test)]
mod tests {
    use aws_sdk_cloudformation::model::Output;

    use super::{outputs_json, phase, StackPhase};

    #[test]
    fn classifies_stack_statuses() {
        assert_eq!(StackPhase::Succeeded, phase("CREATE_COMPLETE"));
        assert_eq!(StackPhase::Succeeded, phase("UPDATE_COMPLETE"));
        assert_eq!(StackPhase::Succeeded, phase("UPDATE_ROLLBACK_COMPLETE"));
        assert_eq!(StackPhase::InProgress, phase("CREATE_IN_PROGRESS"));
        assert_eq!(StackPhase::InProgress, phase("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"));
        assert_eq!(StackPhase::InProgress, phase("ROLLBACK_IN_PROGRESS"));
        assert_eq!(StackPhase::Failed, phase("CREATE_FAILED"));
        assert_eq!(StackPhase::Failed, phase("ROLLBACK_COMPLETE"));
        assert_eq!(StackPhase::Failed, phase("DELETE_COMPLETE"));
    }

    #[test]
    fn outputs_as_json_map() {
        let outputs = vec![
            Output::builder()
                .output_key("pdnsAddress")
                .output_value("http://10.0.1.5:9200/")
                .build(),
            Output::builder().output_key("NoValue").build(),
        ];

        let json = outputs_json(&outputs).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!("http://10.0.1.5:9200/", parsed["pdnsAddress"]);
        assert_eq!(true, parsed.get("NoValue").is_none());
    }
}
