use serde::Serialize;

use crate::errors::JobError;

/// Common response body: `{status, message, data?, error?}`.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: JobError) -> Self {
        Self {
            status: "error".to_string(),
            message: error.message.clone(),
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn success_envelope_omits_error_field() {
        let env = ApiEnvelope::success("ok", serde_json::json!({"n": 1}));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["n"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_envelope_carries_kind() {
        let env = ApiEnvelope::<()>::error(JobError::new(ErrorKind::NotFound, "missing"));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "not_found");
        assert!(value.get("data").is_none());
    }
}
