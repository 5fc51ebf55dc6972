//! Request validation for course and block identifiers.
//!
//! Course ids must parse and exist in the catalog; block ids only have to
//! parse. The block's existence is not checked.

use std::borrow::Cow;

use tracing::error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::catalog::CourseCatalog;
use crate::keys::{CourseKey, UsageKey};
use crate::models::{BlockRequest, CourseRequest};
use crate::types::{AppError, AppResult, FieldErrors};

pub fn validate_block_syntax(value: &str) -> Result<(), ValidationError> {
    // Blank values are reported by the length rule alone
    if value.is_empty() || RequestValidator::validate_block(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_block")
            .with_message(Cow::Borrowed("Invalid block_id.")))
    }
}

pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string()))
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

pub struct RequestValidator<'a> {
    catalog: &'a dyn CourseCatalog,
}

impl<'a> RequestValidator<'a> {
    pub fn new(catalog: &'a dyn CourseCatalog) -> Self {
        Self { catalog }
    }

    /// True when `identifier` is a well-formed course key of an existing course.
    pub async fn validate_course(&self, identifier: &str) -> bool {
        let key = match CourseKey::parse(identifier) {
            Ok(key) => key,
            Err(_) => {
                error!("CMM-Api error validate course, invalid format: {}", identifier);
                return false;
            }
        };
        match self.catalog.exists(&key).await {
            Ok(true) => true,
            Ok(false) => {
                error!("CMM-Api error validate course, course does not exist: {}", identifier);
                false
            }
            Err(e) => {
                error!("CMM-Api error validate course, catalog lookup failed for {}: {:?}", identifier, e);
                false
            }
        }
    }

    /// True when `identifier` is a well-formed block key.
    pub fn validate_block(identifier: &str) -> bool {
        match UsageKey::parse(identifier) {
            Ok(_) => true,
            Err(_) => {
                error!("CMM-Api error validate block id, invalid format: {}", identifier);
                false
            }
        }
    }

    pub async fn course_request(&self, request: &CourseRequest) -> AppResult<CourseKey> {
        request.validate().map_err(|e| AppError::Validation(field_errors(&e)))?;
        let raw = request.course_id.as_deref().unwrap_or_default();
        if !self.validate_course(raw).await {
            return Err(AppError::field("course_id", "Invalid course_id."));
        }
        CourseKey::parse(raw).map_err(|_| AppError::field("course_id", "Invalid course_id."))
    }

    pub fn block_request(request: &BlockRequest) -> AppResult<UsageKey> {
        request.validate().map_err(|e| AppError::Validation(field_errors(&e)))?;
        let raw = request.block_id.as_deref().unwrap_or_default();
        UsageKey::parse(raw).map_err(|_| AppError::field("block_id", "Invalid block_id."))
    }
}
