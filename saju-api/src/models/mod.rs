//! Data models

pub mod analysis;
pub mod payment;
pub mod request;

pub use analysis::{
    AnalysisOutput, AnalysisRecord, AnalysisStatus, PatchError, RecordPatch, ServiceType,
    ShareInfo, TokenRefundInfo, TokenUsage,
};
pub use payment::{PaymentProvider, PaymentRecord, PaymentStatus};
pub use request::{
    AnalysisMode, BirthDetails, CounselingTone, FortuneFeature, FortuneRequest, Gender,
    InputError, PersonInput, PersonProfile, SajuRequest, TargetType,
};
