//! Analysis job state machine and result document
//!
//! A record progresses `QUEUED → PROCESSING → COMPLETED | FAILED`.
//! `QUEUED → FAILED` is allowed for jobs that fail before any processing.
//! Once terminal, a record only changes through share-token issuance.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which product produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Saju,
    Fortune,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Saju => "saju",
            ServiceType::Fortune => "fortune",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "saju" => Some(ServiceType::Saju),
            "fortune" => Some(ServiceType::Fortune),
            _ => None,
        }
    }
}

/// Record lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            AnalysisStatus::Queued => 0,
            AnalysisStatus::Processing => 1,
            AnalysisStatus::Completed | AnalysisStatus::Failed => 2,
        }
    }

    /// Whether a record in `self` may be written with status `next`
    ///
    /// Re-writing the current non-terminal status (a step/progress update) is allowed.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    /// Label used by the history list
    pub fn display_text(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "Waiting",
            AnalysisStatus::Processing => "In progress",
            AnalysisStatus::Completed => "Completed",
            AnalysisStatus::Failed => "Failed",
        }
    }
}

/// Generated report content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub summary: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_info: Option<String>,
}

/// Tokens debited for the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub reference_id: String,
    pub amount: i64,
}

/// Outcome of the automatic refund after a failed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRefundInfo {
    pub attempted: bool,
    pub reference_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// One analysis job as a single document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub result_id: String,
    pub login_id: String,
    pub service_type: ServiceType,
    /// Fortune feature key (`today`, `compatibility`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    pub status: AnalysisStatus,
    pub step: String,
    pub progress_message: String,
    /// Normalized request payload as submitted
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_refund: Option<TokenRefundInfo>,
    #[serde(default)]
    pub share: ShareInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AnalysisRecord {
    /// Fresh queued record
    pub fn queued(
        result_id: String,
        login_id: String,
        service_type: ServiceType,
        feature: Option<String>,
        request: Value,
        token_usage: Option<TokenUsage>,
        now_ms: i64,
    ) -> Self {
        Self {
            result_id,
            login_id,
            service_type,
            feature,
            status: AnalysisStatus::Queued,
            step: "QUEUED".to_string(),
            progress_message: "Your request is waiting to be processed.".to_string(),
            request,
            result: None,
            error_message: None,
            token_usage,
            token_refund: None,
            share: ShareInfo::default(),
            notice_message: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Summary shown in lists (empty until completed)
    pub fn summary(&self) -> &str {
        self.result.as_ref().map(|r| r.summary.as_str()).unwrap_or("")
    }

    /// Browser URL of the finished report
    pub fn result_url(&self) -> String {
        match self.service_type {
            ServiceType::Saju => format!("/user/mypage/history/{}", self.result_id),
            ServiceType::Fortune => format!("/fortune/result/{}", self.result_id),
        }
    }

    /// Polling URL for this record
    pub fn status_url(&self) -> String {
        match (self.service_type, self.feature.as_deref()) {
            (ServiceType::Fortune, Some(feature)) => {
                format!("/api/fortune/{}/request/{}/status", feature, self.result_id)
            }
            _ => format!("/api/saju/request/{}/status", self.result_id),
        }
    }
}

/// Patch rejected by the state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("record {0} is already terminal")]
    Terminal(String),
    #[error("status cannot move from {from} to {to}")]
    Regression { from: &'static str, to: &'static str },
}

/// Partial update merged into a record by the background job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<AnalysisStatus>,
    pub step: Option<String>,
    pub progress_message: Option<String>,
    pub result: Option<AnalysisOutput>,
    pub error_message: Option<String>,
    pub token_refund: Option<TokenRefundInfo>,
    pub notice_message: Option<String>,
}

impl RecordPatch {
    /// Step/progress update without a status change
    pub fn step(step: &str, progress_message: &str) -> Self {
        Self {
            step: Some(step.to_string()),
            progress_message: Some(progress_message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AnalysisStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_result(mut self, result: AnalysisOutput) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_refund(mut self, refund: TokenRefundInfo) -> Self {
        self.token_refund = Some(refund);
        self
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        let notice = notice.into();
        if !notice.is_empty() {
            self.notice_message = Some(notice);
        }
        self
    }

    /// Merge into `record`, enforcing forward-only status
    pub fn apply(self, record: &mut AnalysisRecord, now_ms: i64) -> Result<(), PatchError> {
        if record.status.is_terminal() {
            return Err(PatchError::Terminal(record.result_id.clone()));
        }
        if let Some(next) = self.status {
            if !record.status.can_transition_to(next) {
                return Err(PatchError::Regression {
                    from: record.status.as_str(),
                    to: next.as_str(),
                });
            }
            record.status = next;
        }
        if let Some(step) = self.step {
            record.step = step;
        }
        if let Some(message) = self.progress_message {
            record.progress_message = message;
        }
        if let Some(result) = self.result {
            record.result = Some(result);
        }
        if let Some(error) = self.error_message {
            record.error_message = Some(error);
        }
        if let Some(refund) = self.token_refund {
            record.token_refund = Some(refund);
        }
        if let Some(notice) = self.notice_message {
            record.notice_message = Some(notice);
        }
        record.updated_at = now_ms.max(record.updated_at);
        Ok(())
    }
}
