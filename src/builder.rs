//! Builder validation state for the in-progress ad-hoc query draft

use crate::model::{QueryResult, QuerySpec, ValidationResult};

/// Where the draft's validation stands
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ValidationPhase {
    #[default]
    Idle,
    Validating,
    Validated(ValidationResult),
    Errored(String),
}

/// Single draft plus its validation and preview outcome
#[derive(Debug, Clone, Default)]
pub struct BuilderState {
    draft: Option<QuerySpec>,
    validation: ValidationPhase,
    preview: Option<QueryResult>,
    testing: bool,
    test_error: Option<String>,
}

impl BuilderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the draft; prior validation and preview no longer apply
    pub fn set_draft(&mut self, spec: QuerySpec) {
        self.draft = Some(spec);
        self.validation = ValidationPhase::Idle;
        self.preview = None;
        self.test_error = None;
    }

    /// Drop the draft and everything derived from it
    pub fn reset(&mut self) {
        *self = BuilderState::default();
    }

    pub fn record_validation_pending(&mut self) {
        self.validation = ValidationPhase::Validating;
    }

    pub fn record_validation_result(&mut self, result: ValidationResult) {
        self.validation = ValidationPhase::Validated(result);
    }

    pub fn record_validation_error(&mut self, message: impl Into<String>) {
        self.validation = ValidationPhase::Errored(message.into());
    }

    pub fn record_test_pending(&mut self) {
        self.testing = true;
        self.test_error = None;
    }

    pub fn record_preview(&mut self, result: QueryResult) {
        self.testing = false;
        self.preview = Some(result);
    }

    pub fn record_test_error(&mut self, message: impl Into<String>) {
        self.testing = false;
        self.test_error = Some(message.into());
    }

    pub fn draft(&self) -> Option<&QuerySpec> {
        self.draft.as_ref()
    }

    pub fn phase(&self) -> &ValidationPhase {
        &self.validation
    }

    pub fn validation_result(&self) -> Option<&ValidationResult> {
        match &self.validation {
            ValidationPhase::Validated(result) => Some(result),
            _ => None,
        }
    }

    pub fn preview(&self) -> Option<&QueryResult> {
        self.preview.as_ref()
    }

    pub fn is_validating(&self) -> bool {
        self.validation == ValidationPhase::Validating
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    /// Latest validation or preview failure
    pub fn error(&self) -> Option<&str> {
        match &self.validation {
            ValidationPhase::Errored(message) => Some(message),
            _ => self.test_error.as_deref(),
        }
    }
}
